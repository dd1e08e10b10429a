//! XML event model consumed by the input processor chain.
//!
//! Every event carries a snapshot of the element path at the point it was
//! produced. For element events the path ends with the element itself; for
//! character data and processing instructions it ends with the enclosing
//! element.

use crate::error::WssError;
use crate::path::{ElementPath, QName};
use crate::soap::{WSU_NS, XML_NS};

/// Kinds of XML events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmlEventKind {
    StartElement,
    EndElement,
    Characters,
    EntityReference,
    ProcessingInstruction,
    Comment,
    EndDocument,
}

/// An attribute on a start element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A single XML event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlEvent {
    kind: XmlEventKind,
    path: ElementPath,
    attributes: Vec<Attribute>,
    text: Option<String>,
}

impl XmlEvent {
    pub fn start_element(path: ElementPath, attributes: Vec<Attribute>) -> Self {
        Self {
            kind: XmlEventKind::StartElement,
            path,
            attributes,
            text: None,
        }
    }

    pub fn end_element(path: ElementPath) -> Self {
        Self {
            kind: XmlEventKind::EndElement,
            path,
            attributes: Vec::new(),
            text: None,
        }
    }

    pub fn characters(path: ElementPath, text: impl Into<String>) -> Self {
        Self {
            kind: XmlEventKind::Characters,
            path,
            attributes: Vec::new(),
            text: Some(text.into()),
        }
    }

    pub fn entity_reference(path: ElementPath, name: impl Into<String>) -> Self {
        Self {
            kind: XmlEventKind::EntityReference,
            path,
            attributes: Vec::new(),
            text: Some(name.into()),
        }
    }

    pub fn processing_instruction(path: ElementPath, content: impl Into<String>) -> Self {
        Self {
            kind: XmlEventKind::ProcessingInstruction,
            path,
            attributes: Vec::new(),
            text: Some(content.into()),
        }
    }

    pub fn comment(path: ElementPath, text: impl Into<String>) -> Self {
        Self {
            kind: XmlEventKind::Comment,
            path,
            attributes: Vec::new(),
            text: Some(text.into()),
        }
    }

    pub fn end_document() -> Self {
        Self {
            kind: XmlEventKind::EndDocument,
            path: ElementPath::default(),
            attributes: Vec::new(),
            text: None,
        }
    }

    pub fn kind(&self) -> XmlEventKind {
        self.kind
    }

    pub fn path(&self) -> &ElementPath {
        &self.path
    }

    /// Path of the element enclosing this event's element.
    pub fn parent_path(&self) -> ElementPath {
        self.path.parent()
    }

    /// Element name for start/end events.
    pub fn name(&self) -> Option<&QName> {
        match self.kind {
            XmlEventKind::StartElement | XmlEventKind::EndElement => self.path.last(),
            _ => None,
        }
    }

    /// Nesting depth; the root element is at level 1.
    pub fn document_level(&self) -> usize {
        self.path.len()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, namespace: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local_name))
            .map(|a| a.value.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The element's identifier: `wsu:Id`, then `Id`, then `xml:id`.
    pub fn id(&self) -> Option<&str> {
        self.attribute(WSU_NS, "Id")
            .or_else(|| self.attribute("", "Id"))
            .or_else(|| self.attribute(XML_NS, "id"))
    }

    pub fn is_start_element(&self) -> bool {
        self.kind == XmlEventKind::StartElement
    }

    pub fn is_end_element(&self) -> bool {
        self.kind == XmlEventKind::EndElement
    }

    pub fn is_end_document(&self) -> bool {
        self.kind == XmlEventKind::EndDocument
    }
}

/// Upstream producer of XML events.
///
/// After the last event a source keeps returning `EndDocument`.
pub trait XmlEventSource {
    fn next_event(&mut self) -> Result<XmlEvent, WssError>;
}

/// A source replaying a prepared event sequence.
#[derive(Debug, Default)]
pub struct VecEventSource {
    events: std::vec::IntoIter<Result<XmlEvent, WssError>>,
}

impl VecEventSource {
    pub fn new(events: Vec<XmlEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect::<Vec<_>>().into_iter(),
        }
    }

    /// A source that fails with `error` after replaying `events`.
    pub fn failing_after(events: Vec<XmlEvent>, error: WssError) -> Self {
        let mut items: Vec<Result<XmlEvent, WssError>> = events.into_iter().map(Ok).collect();
        items.push(Err(error));
        Self {
            events: items.into_iter(),
        }
    }
}

impl XmlEventSource for VecEventSource {
    fn next_event(&mut self) -> Result<XmlEvent, WssError> {
        self.events.next().unwrap_or_else(|| Ok(XmlEvent::end_document()))
    }
}

/// Builds well-nested event sequences with correct path snapshots.
#[derive(Debug, Default)]
pub struct EventStreamBuilder {
    path: ElementPath,
    events: Vec<XmlEvent>,
}

impl EventStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(self, name: QName) -> Self {
        self.start_with(name, Vec::new())
    }

    pub fn start_with(mut self, name: QName, attributes: Vec<Attribute>) -> Self {
        self.path.push(name);
        self.events
            .push(XmlEvent::start_element(self.path.clone(), attributes));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.events
            .push(XmlEvent::characters(self.path.clone(), text));
        self
    }

    pub fn entity_reference(mut self, name: &str) -> Self {
        self.events
            .push(XmlEvent::entity_reference(self.path.clone(), name));
        self
    }

    pub fn processing_instruction(mut self, content: &str) -> Self {
        self.events
            .push(XmlEvent::processing_instruction(self.path.clone(), content));
        self
    }

    /// Close the innermost open element. Closing with nothing open is a no-op.
    pub fn end(mut self) -> Self {
        if !self.path.is_empty() {
            self.events.push(XmlEvent::end_element(self.path.clone()));
            self.path.pop();
        }
        self
    }

    /// A start immediately followed by its end.
    pub fn empty(self, name: QName, attributes: Vec<Attribute>) -> Self {
        self.start_with(name, attributes).end()
    }

    pub fn build(self) -> Vec<XmlEvent> {
        self.events
    }

    pub fn into_source(self) -> VecEventSource {
        VecEventSource::new(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::SOAP_11_NS;

    #[test]
    fn test_builder_tracks_paths() {
        let events = EventStreamBuilder::new()
            .start(QName::new(SOAP_11_NS, "Envelope"))
            .start(QName::new(SOAP_11_NS, "Body"))
            .text("hello")
            .end()
            .end()
            .build();

        assert_eq!(events.len(), 5);
        assert_eq!(events[1].document_level(), 2);
        assert_eq!(events[2].kind(), XmlEventKind::Characters);
        assert_eq!(events[2].path().len(), 2);
        assert_eq!(events[2].name(), None);
        assert!(events[3].is_end_element());
        assert_eq!(events[3].name(), Some(&QName::new(SOAP_11_NS, "Body")));
        assert_eq!(events[4].document_level(), 1);
    }

    #[test]
    fn test_id_lookup_order() {
        let path = ElementPath::new(vec![QName::unqualified("a")]);
        let event = XmlEvent::start_element(
            path.clone(),
            vec![
                Attribute::new(QName::unqualified("Id"), "plain"),
                Attribute::new(QName::new(WSU_NS, "Id"), "utility"),
            ],
        );
        assert_eq!(event.id(), Some("utility"));

        let event = XmlEvent::start_element(
            path,
            vec![Attribute::new(QName::new(XML_NS, "id"), "xml")],
        );
        assert_eq!(event.id(), Some("xml"));
    }

    #[test]
    fn test_vec_source_ends_with_end_document() {
        let mut source = VecEventSource::new(vec![XmlEvent::comment(ElementPath::default(), "x")]);
        assert_eq!(source.next_event().unwrap().kind(), XmlEventKind::Comment);
        assert!(source.next_event().unwrap().is_end_document());
        assert!(source.next_event().unwrap().is_end_document());
    }

    #[test]
    fn test_failing_source() {
        let mut source = VecEventSource::failing_after(
            Vec::new(),
            WssError::XmlParse("broken".to_string()),
        );
        assert!(source.next_event().is_err());
    }
}
