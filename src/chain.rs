//! Input processor chain.
//!
//! Processors are ordered by phase and by declared before/after constraints.
//! Events are pulled: the outermost processor asks the cursor for the next
//! event, which recursively asks the processors closer to the source, so every
//! event travels source → preprocessing → processing → postprocessing.

use crate::context::MessageContext;
use crate::error::WssError;
use crate::event::{XmlEvent, XmlEventSource};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Processing phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Preprocessing,
    Processing,
    Postprocessing,
}

pub type ProcessorId = &'static str;

/// A stage of the streaming pipeline.
pub trait InputProcessor: Send {
    fn id(&self) -> ProcessorId;

    fn phase(&self) -> Phase;

    /// Processors this one must run before, within its phase.
    fn before(&self) -> &[ProcessorId] {
        &[]
    }

    /// Processors this one must run after, within its phase.
    fn after(&self) -> &[ProcessorId] {
        &[]
    }

    /// Handle the next event while the security header is being processed.
    fn process_next_header_event(
        &mut self,
        cursor: &mut ChainCursor<'_, '_>,
    ) -> Result<XmlEvent, WssError> {
        cursor.process_header_event()
    }

    /// Handle the next event of the rest of the document.
    fn process_next_event(&mut self, cursor: &mut ChainCursor<'_, '_>) -> Result<XmlEvent, WssError> {
        cursor.process_event()
    }
}

#[derive(Debug, Clone, Copy)]
enum Dispatch {
    Header,
    Document,
}

/// Ordered processors for one message.
pub struct InputProcessorChain {
    processors: Vec<Box<dyn InputProcessor>>,
}

impl std::fmt::Debug for InputProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputProcessorChain")
            .field("processors", &self.ids())
            .finish()
    }
}

impl InputProcessorChain {
    /// Order processors by phase and constraints.
    ///
    /// Ties keep registration order. Duplicate ids, constraints naming an
    /// unknown processor and cycles are configuration errors.
    pub fn assemble(processors: Vec<Box<dyn InputProcessor>>) -> Result<Self, WssError> {
        let mut index: HashMap<ProcessorId, usize> = HashMap::new();
        for (i, processor) in processors.iter().enumerate() {
            if index.insert(processor.id(), i).is_some() {
                return Err(WssError::Config(format!(
                    "duplicate input processor '{}'",
                    processor.id()
                )));
            }
        }

        let count = processors.len();
        let mut edges: Vec<HashSet<usize>> = vec![HashSet::new(); count];
        for (i, processor) in processors.iter().enumerate() {
            for (j, other) in processors.iter().enumerate() {
                if processor.phase() < other.phase() {
                    edges[i].insert(j);
                }
            }
            for target in processor.before() {
                let j = lookup(&index, processor.id(), target)?;
                edges[i].insert(j);
            }
            for target in processor.after() {
                let j = lookup(&index, processor.id(), target)?;
                edges[j].insert(i);
            }
        }

        let mut in_degree = vec![0usize; count];
        for targets in &edges {
            for &j in targets {
                in_degree[j] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &j in &edges[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        if order.len() != count {
            let stuck = (0..count)
                .filter(|i| !order.contains(i))
                .map(|i| processors[i].id())
                .collect::<Vec<_>>();
            return Err(WssError::Config(format!(
                "input processor ordering constraints form a cycle: {}",
                stuck.join(", ")
            )));
        }

        let mut slots: Vec<Option<Box<dyn InputProcessor>>> =
            processors.into_iter().map(Some).collect();
        let processors: Vec<Box<dyn InputProcessor>> =
            order.iter().filter_map(|&i| slots[i].take()).collect();

        let chain = Self { processors };
        debug!(processors = ?chain.ids(), "input processor chain assembled");
        Ok(chain)
    }

    /// Processor ids in execution order.
    pub fn ids(&self) -> Vec<ProcessorId> {
        self.processors.iter().map(|p| p.id()).collect()
    }

    /// A cursor pulling events from `source` through the whole chain.
    pub fn cursor<'a, 's>(
        &'a mut self,
        source: &'a mut (dyn XmlEventSource + 's),
        context: &'a mut MessageContext,
    ) -> ChainCursor<'a, 's> {
        ChainCursor {
            processors: &mut self.processors,
            source,
            context,
        }
    }
}

fn lookup(
    index: &HashMap<ProcessorId, usize>,
    owner: ProcessorId,
    target: &str,
) -> Result<usize, WssError> {
    index.get(target).copied().ok_or_else(|| {
        WssError::Config(format!(
            "input processor '{}' references unknown processor '{}'",
            owner, target
        ))
    })
}

/// A position in the chain: the processors between the caller and the source.
pub struct ChainCursor<'a, 's> {
    processors: &'a mut [Box<dyn InputProcessor>],
    source: &'a mut (dyn XmlEventSource + 's),
    context: &'a mut MessageContext,
}

impl<'a, 's> ChainCursor<'a, 's> {
    /// Pull the next event with header dispatch.
    pub fn process_header_event(&mut self) -> Result<XmlEvent, WssError> {
        self.pull(Dispatch::Header)
    }

    /// Pull the next event with document dispatch.
    pub fn process_event(&mut self) -> Result<XmlEvent, WssError> {
        self.pull(Dispatch::Document)
    }

    pub fn context(&mut self) -> &mut MessageContext {
        self.context
    }

    fn pull(&mut self, dispatch: Dispatch) -> Result<XmlEvent, WssError> {
        match self.processors.split_last_mut() {
            None => {
                let event = self.source.next_event()?;
                self.context.document.observe(&event);
                Ok(event)
            }
            Some((processor, upstream)) => {
                let mut cursor = ChainCursor {
                    processors: upstream,
                    source: &mut *self.source,
                    context: &mut *self.context,
                };
                match dispatch {
                    Dispatch::Header => processor.process_next_header_event(&mut cursor),
                    Dispatch::Document => processor.process_next_event(&mut cursor),
                }
            }
        }
    }
}
