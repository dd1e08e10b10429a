//! Security header processing.
//!
//! Finds the `wsse:Security` header addressed to this receiver, registers the
//! tokens it carries, parses username tokens, collects the ids covered by
//! signature and encryption references, and validates the timestamp.

use crate::bsp::BspRule;
use crate::chain::{ChainCursor, InputProcessor, Phase, ProcessorId};
use crate::config::TimestampConfig;
use crate::context::{MessageContext, Protection, ProtectionKind};
use crate::derivation::UsernameToken;
use crate::error::WssError;
use crate::event::{XmlEvent, XmlEventKind};
use crate::path::{ElementPath, QName};
use crate::security_event::{SecurityEvent, SecurityEventKind, TokenKind, TokenRef};
use crate::soap::{
    SoapNames, DSIG_NS, KERBEROS_VALUE_TYPE_MARKER, SAML1_NS, SAML_NS, WSC13_NS, WSC_NS,
    WSSE11_NS, WSSE_NS, WSU_NS, XENC_NS,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const SECURITY_HEADER_PROCESSOR: ProcessorId = "security-header";

const ULTIMATE_RECEIVER_ROLE: &str = "http://www.w3.org/2003/05/soap-envelope/role/ultimateReceiver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Username,
    Password,
    Nonce,
    Created,
    Salt,
    Iteration,
    TimestampCreated,
    TimestampExpires,
}

#[derive(Debug)]
struct TextCapture {
    level: usize,
    field: TextField,
    buffer: String,
}

#[derive(Debug, Default)]
struct UsernameTokenDraft {
    id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    nonce: Option<Vec<u8>>,
    created: Option<String>,
    salt: Option<Vec<u8>>,
    iteration: Option<u32>,
}

#[derive(Debug, Default)]
struct TimestampDraft {
    created: Option<String>,
    expires: Option<String>,
}

/// References collected inside a `ds:Signature`, `xenc:EncryptedKey` or
/// standalone `xenc:ReferenceList`.
#[derive(Debug)]
struct ReferenceCollector {
    level: usize,
    kind: ProtectionKind,
    references: Vec<String>,
    token_id: Option<String>,
    token_hint: Option<TokenKind>,
}

impl ReferenceCollector {
    fn new(level: usize, kind: ProtectionKind) -> Self {
        Self {
            level,
            kind,
            references: Vec::new(),
            token_id: None,
            token_hint: None,
        }
    }
}

/// Preprocessing stage that interprets the responsible security header.
#[derive(Debug)]
pub struct SecurityHeaderInputProcessor {
    soap: SoapNames,
    actor: Option<String>,
    timestamp: TimestampConfig,
    text: Option<TextCapture>,
    username: Option<UsernameTokenDraft>,
    timestamp_draft: Option<TimestampDraft>,
    signature: Option<ReferenceCollector>,
    encryption: Option<ReferenceCollector>,
    /// Ids of header elements already streamed past
    seen_ids: HashMap<String, ElementPath>,
}

impl SecurityHeaderInputProcessor {
    pub fn new(soap: SoapNames, actor: Option<String>, timestamp: TimestampConfig) -> Self {
        Self {
            soap,
            actor,
            timestamp,
            text: None,
            username: None,
            timestamp_draft: None,
            signature: None,
            encryption: None,
            seen_ids: HashMap::new(),
        }
    }

    fn inspect(&mut self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        match event.kind() {
            XmlEventKind::StartElement => self.on_start(event, ctx),
            XmlEventKind::EndElement => self.on_end(event, ctx),
            XmlEventKind::Characters => {
                if let (Some(capture), Some(text)) = (self.text.as_mut(), event.text()) {
                    capture.buffer.push_str(text);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn is_responsible(&self, event: &XmlEvent) -> bool {
        let ns = self.soap.namespace();
        let actor = event
            .attribute(ns, "actor")
            .or_else(|| event.attribute(ns, "role"))
            .filter(|a| *a != ULTIMATE_RECEIVER_ROLE);
        actor == self.actor.as_deref()
    }

    fn on_start(&mut self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        let path = event.path();
        if self.soap.is_body(path) {
            ctx.document.mark_header_complete();
            return Ok(());
        }

        // Header blocks ahead of the security header may be referenced later.
        if let Some(id) = event.id().filter(|_| !ctx.document.header_complete()) {
            self.seen_ids.insert(id.to_string(), path.clone());
        }

        if !ctx.document.security_header_open() {
            let is_security = path.len() == 3
                && self.soap.is_in_soap_header(path)
                && path.last().is_some_and(|n| n.is(WSSE_NS, "Security"));
            if is_security && ctx.document.security_header().is_none() && self.is_responsible(event) {
                debug!(path = %path, "entering security header");
                ctx.document.enter_security_header(path.clone());
            }
            return Ok(());
        }

        let Some(name) = path.last() else {
            return Ok(());
        };
        let level = path.len();
        let ns = name.namespace.as_str();
        let local = name.local_name.as_str();

        match (ns, local) {
            (WSSE_NS, "BinarySecurityToken") => {
                let kind = match event.attribute("", "ValueType") {
                    Some(v) if v.contains(KERBEROS_VALUE_TYPE_MARKER) => TokenKind::KerberosToken,
                    _ => TokenKind::X509Token,
                };
                ctx.register_token(event.id(), kind)?;
            }
            (WSSE_NS, "UsernameToken") => {
                self.username = Some(UsernameTokenDraft {
                    id: event.id().map(str::to_string),
                    ..Default::default()
                });
            }
            (SAML_NS, "Assertion") => {
                let id = event.attribute("", "ID").or_else(|| event.id());
                ctx.register_token(id, TokenKind::SamlToken)?;
            }
            (SAML1_NS, "Assertion") => {
                let id = event.attribute("", "AssertionID").or_else(|| event.id());
                ctx.register_token(id, TokenKind::SamlToken)?;
            }
            (WSC_NS, "SecurityContextToken") | (WSC13_NS, "SecurityContextToken") => {
                ctx.register_token(event.id(), TokenKind::SecurityContextToken)?;
            }
            (WSU_NS, "Timestamp") if level == ctx.document.security_header().map_or(0, |h| h.len() + 1) => {
                if ctx.security.count_timestamp() > 1 {
                    ctx.security.handle_bsp_rule(BspRule::R3227)?;
                }
                self.timestamp_draft = Some(TimestampDraft::default());
            }
            (DSIG_NS, "Signature") if self.signature.is_none() => {
                self.signature = Some(ReferenceCollector::new(level, ProtectionKind::Signed));
            }
            (DSIG_NS, "Reference") => {
                if let (Some(signature), Some(uri)) =
                    (self.signature.as_mut(), event.attribute("", "URI"))
                {
                    if let Some(id) = uri.strip_prefix('#') {
                        signature.references.push(id.to_string());
                    }
                }
            }
            (DSIG_NS, "X509Data") => {
                if let Some(collector) = self.active_collector() {
                    collector.token_hint.get_or_insert(TokenKind::X509Token);
                }
            }
            (XENC_NS, "EncryptedKey") if self.encryption.is_none() => {
                self.encryption = Some(ReferenceCollector::new(level, ProtectionKind::Encrypted));
            }
            (XENC_NS, "ReferenceList") if self.encryption.is_none() => {
                self.encryption = Some(ReferenceCollector::new(level, ProtectionKind::Encrypted));
            }
            (XENC_NS, "DataReference") => {
                if let (Some(encryption), Some(uri)) =
                    (self.encryption.as_mut(), event.attribute("", "URI"))
                {
                    if let Some(id) = uri.strip_prefix('#') {
                        encryption.references.push(id.to_string());
                    }
                }
            }
            (WSSE_NS, "Reference") => {
                let uri = event.attribute("", "URI").map(|u| u.trim_start_matches('#').to_string());
                let hint = event.attribute("", "ValueType").and_then(token_kind_from_value_type);
                if let Some(collector) = self.active_collector() {
                    if collector.token_id.is_none() {
                        collector.token_id = uri;
                    }
                    if collector.token_hint.is_none() {
                        collector.token_hint = hint;
                    }
                }
            }
            (WSSE_NS, "KeyIdentifier") => {
                let hint = event.attribute("", "ValueType").and_then(token_kind_from_value_type);
                if let Some(collector) = self.active_collector() {
                    if collector.token_hint.is_none() {
                        collector.token_hint = hint;
                    }
                }
            }
            _ => {
                if let Some(field) = self.text_field(&event.parent_path(), name) {
                    self.text = Some(TextCapture {
                        level,
                        field,
                        buffer: String::new(),
                    });
                }
            }
        }
        Ok(())
    }

    fn on_end(&mut self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        let path = event.path();
        let level = path.len();

        if level == 2 && self.soap.is_in_soap_header(path) {
            ctx.document.mark_header_complete();
            return Ok(());
        }
        if !ctx.document.security_header_open() {
            return Ok(());
        }
        if ctx.document.security_header() == Some(path) {
            debug!(
                tokens = ctx.security.username_tokens().len(),
                "security header complete"
            );
            ctx.document.leave_security_header();
            ctx.document.mark_header_complete();
            return Ok(());
        }

        if self.text.as_ref().is_some_and(|c| c.level == level) {
            if let Some(capture) = self.text.take() {
                self.apply_text(capture)?;
            }
            return Ok(());
        }

        let Some(name) = path.last() else {
            return Ok(());
        };
        if name.is(WSSE_NS, "UsernameToken") {
            if let Some(draft) = self.username.take() {
                let token = build_username_token(draft)?;
                debug!(username = token.username(), "username token parsed");
                ctx.register_token(token.id(), TokenKind::UsernameToken)?;
                ctx.security.add_username_token(token);
            }
        } else if name.is(WSU_NS, "Timestamp") {
            if let Some(draft) = self.timestamp_draft.take() {
                self.validate_timestamp(&draft)?;
            }
        } else if self.signature.as_ref().is_some_and(|c| c.level == level) {
            if let Some(collector) = self.signature.take() {
                self.register_protections(collector, ctx)?;
            }
        } else if self.encryption.as_ref().is_some_and(|c| c.level == level) {
            if let Some(collector) = self.encryption.take() {
                self.register_protections(collector, ctx)?;
            }
        }
        Ok(())
    }

    fn active_collector(&mut self) -> Option<&mut ReferenceCollector> {
        self.encryption.as_mut().or(self.signature.as_mut())
    }

    fn text_field(&self, parent: &ElementPath, name: &QName) -> Option<TextField> {
        let parent = parent.last()?;
        if parent.is(WSSE_NS, "UsernameToken") && self.username.is_some() {
            return match (name.namespace.as_str(), name.local_name.as_str()) {
                (WSSE_NS, "Username") => Some(TextField::Username),
                (WSSE_NS, "Password") => Some(TextField::Password),
                (WSSE_NS, "Nonce") => Some(TextField::Nonce),
                (WSU_NS, "Created") => Some(TextField::Created),
                (WSSE11_NS, "Salt") => Some(TextField::Salt),
                (WSSE11_NS, "Iteration") => Some(TextField::Iteration),
                _ => None,
            };
        }
        if parent.is(WSU_NS, "Timestamp") && self.timestamp_draft.is_some() {
            return match (name.namespace.as_str(), name.local_name.as_str()) {
                (WSU_NS, "Created") => Some(TextField::TimestampCreated),
                (WSU_NS, "Expires") => Some(TextField::TimestampExpires),
                _ => None,
            };
        }
        None
    }

    fn apply_text(&mut self, capture: TextCapture) -> Result<(), WssError> {
        let value = capture.buffer.trim().to_string();
        match capture.field {
            TextField::TimestampCreated => {
                if let Some(ts) = self.timestamp_draft.as_mut() {
                    ts.created = Some(value);
                }
            }
            TextField::TimestampExpires => {
                if let Some(ts) = self.timestamp_draft.as_mut() {
                    ts.expires = Some(value);
                }
            }
            field => {
                let Some(draft) = self.username.as_mut() else {
                    return Ok(());
                };
                match field {
                    TextField::Username => draft.username = Some(value),
                    TextField::Password => draft.password = Some(value),
                    TextField::Created => draft.created = Some(value),
                    TextField::Nonce => draft.nonce = Some(decode_base64("wsse:Nonce", &value)?),
                    TextField::Salt => draft.salt = Some(decode_base64("wsse11:Salt", &value)?),
                    TextField::Iteration => {
                        let iteration = value.parse::<u32>().map_err(|_| {
                            WssError::InvalidToken(format!(
                                "wsse11:Iteration '{}' is not a positive integer",
                                value
                            ))
                        })?;
                        draft.iteration = Some(iteration);
                    }
                    TextField::TimestampCreated | TextField::TimestampExpires => {}
                }
            }
        }
        Ok(())
    }

    fn register_protections(
        &self,
        collector: ReferenceCollector,
        ctx: &mut MessageContext,
    ) -> Result<(), WssError> {
        let kind = collector
            .token_id
            .as_deref()
            .and_then(|id| ctx.security.token_kind(id))
            .or(collector.token_hint);
        let token = TokenRef::new(collector.token_id.clone(), kind);
        debug!(
            protection = ?collector.kind,
            references = collector.references.len(),
            token = ?token.kind,
            "protection references collected"
        );

        for id in &collector.references {
            let protection = match collector.kind {
                ProtectionKind::Signed => Protection::signed(token.clone()),
                _ => Protection::encrypted(token.clone()),
            };
            ctx.security.register_protection(id.clone(), protection);

            // Elements already streamed past get their event now.
            if let Some(path) = self.seen_ids.get(id) {
                let event_kind = match collector.kind {
                    ProtectionKind::Signed if self.is_part(path) => SecurityEventKind::SignedPart,
                    ProtectionKind::Signed => SecurityEventKind::SignedElement,
                    _ if self.is_part(path) => SecurityEventKind::EncryptedPart,
                    _ => SecurityEventKind::EncryptedElement,
                };
                ctx.register_security_event(SecurityEvent::protected(
                    event_kind,
                    path.clone(),
                    token.clone(),
                ))?;
            }
        }
        Ok(())
    }

    fn is_part(&self, path: &ElementPath) -> bool {
        self.soap.is_body(path) || self.soap.is_header_part(path)
    }

    fn validate_timestamp(&self, draft: &TimestampDraft) -> Result<(), WssError> {
        if !self.timestamp.enabled {
            return Ok(());
        }
        let now = Utc::now();
        let skew = self.timestamp.future_skew()?;

        let created = draft
            .created
            .as_deref()
            .ok_or_else(|| WssError::InvalidTimestamp("wsu:Timestamp has no wsu:Created".to_string()))?;
        let created_time = parse_time(created)?;
        if created_time > shifted(now, skew)? {
            return Err(WssError::InvalidTimestamp(format!(
                "wsu:Created {} is in the future",
                created
            )));
        }
        if let Some(max_age) = self.timestamp.max_age()? {
            let age = now.signed_duration_since(created_time);
            if age > max_age {
                return Err(WssError::MessageExpired(format!(
                    "timestamp is too old: {} seconds (max: {})",
                    age.num_seconds(),
                    self.timestamp.max_age_secs
                )));
            }
        }

        if let Some(expires) = draft.expires.as_deref() {
            let expires_time = parse_time(expires)?;
            if expires_time < created_time {
                return Err(WssError::InvalidTimestamp(
                    "wsu:Expires precedes wsu:Created".to_string(),
                ));
            }
            if now > shifted(expires_time, skew)? {
                return Err(WssError::MessageExpired(format!(
                    "security timestamp expired at {}",
                    expires
                )));
            }
        } else {
            warn!("wsu:Timestamp without wsu:Expires");
        }
        Ok(())
    }
}

impl InputProcessor for SecurityHeaderInputProcessor {
    fn id(&self) -> ProcessorId {
        SECURITY_HEADER_PROCESSOR
    }

    fn phase(&self) -> Phase {
        Phase::Preprocessing
    }

    fn process_next_header_event(
        &mut self,
        cursor: &mut ChainCursor<'_, '_>,
    ) -> Result<XmlEvent, WssError> {
        let event = cursor.process_header_event()?;
        self.inspect(&event, cursor.context())?;
        Ok(event)
    }

    fn process_next_event(&mut self, cursor: &mut ChainCursor<'_, '_>) -> Result<XmlEvent, WssError> {
        let event = cursor.process_event()?;
        self.inspect(&event, cursor.context())?;
        Ok(event)
    }
}

fn shifted(time: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, WssError> {
    time.checked_add_signed(by)
        .ok_or_else(|| WssError::InvalidTimestamp(format!("{} is out of range", time)))
}

fn token_kind_from_value_type(value_type: &str) -> Option<TokenKind> {
    if value_type.contains(KERBEROS_VALUE_TYPE_MARKER) {
        Some(TokenKind::KerberosToken)
    } else if value_type.contains("X509") {
        Some(TokenKind::X509Token)
    } else if value_type.contains("SAML") {
        Some(TokenKind::SamlToken)
    } else if value_type.contains("UsernameToken") {
        Some(TokenKind::UsernameToken)
    } else if value_type.contains("/sc/sct") || value_type.contains("secureconversation") {
        Some(TokenKind::SecurityContextToken)
    } else {
        None
    }
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, WssError> {
    STANDARD
        .decode(value)
        .map_err(|e| WssError::InvalidToken(format!("{} is not valid base64: {}", field, e)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, WssError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| WssError::InvalidTimestamp(format!("invalid timestamp format: {}", value)))
}

fn build_username_token(draft: UsernameTokenDraft) -> Result<UsernameToken, WssError> {
    let username = draft
        .username
        .filter(|u| !u.is_empty())
        .ok_or_else(|| WssError::InvalidToken("wsse:UsernameToken has no wsse:Username".to_string()))?;

    let mut token = UsernameToken::new(username, draft.password.unwrap_or_default());
    if let Some(id) = draft.id {
        token = token.with_id(id);
    }
    if let Some(created) = draft.created {
        token = token.with_created(created);
    }
    if let Some(nonce) = draft.nonce {
        token = token.with_nonce(nonce);
    }
    if let Some(salt) = draft.salt {
        token = token.with_salt(salt);
    }
    if let Some(iteration) = draft.iteration {
        token = token.with_iteration(iteration);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::BspEnforcement;
    use crate::chain::InputProcessorChain;
    use crate::context::SecurityContext;
    use crate::enforcer::PolicyEnforcer;
    use crate::event::{Attribute, EventStreamBuilder, VecEventSource};
    use crate::soap::SOAP_11_NS;
    use std::sync::Arc;

    fn soap(local: &str) -> QName {
        QName::new(SOAP_11_NS, local)
    }

    fn wsse(local: &str) -> QName {
        QName::new(WSSE_NS, local)
    }

    fn wsu_id(id: &str) -> Vec<Attribute> {
        vec![Attribute::new(QName::new(WSU_NS, "Id"), id)]
    }

    fn context(strict_bsp: bool) -> MessageContext {
        let bsp = if strict_bsp {
            BspEnforcement::strict()
        } else {
            BspEnforcement::default()
        };
        MessageContext::new(
            SecurityContext::new(false, Arc::new(bsp)),
            PolicyEnforcer::new(Vec::new(), SoapNames::soap11(), false),
        )
    }

    fn run(builder: EventStreamBuilder, ctx: &mut MessageContext) -> Result<(), WssError> {
        let processor = SecurityHeaderInputProcessor::new(
            SoapNames::soap11(),
            None,
            TimestampConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let mut chain = InputProcessorChain::assemble(vec![Box::new(processor)])?;
        let mut source: VecEventSource = builder.into_source();
        let mut cursor = chain.cursor(&mut source, ctx);
        loop {
            let header = !cursor.context().document.header_complete();
            let event = if header {
                cursor.process_header_event()?
            } else {
                cursor.process_event()?
            };
            if event.is_end_document() {
                return Ok(());
            }
        }
    }

    fn header_with(content: impl FnOnce(EventStreamBuilder) -> EventStreamBuilder) -> EventStreamBuilder {
        let builder = EventStreamBuilder::new()
            .start(soap("Envelope"))
            .start(soap("Header"))
            .start(wsse("Security"));
        content(builder)
            .end()
            .end()
            .start_with(soap("Body"), wsu_id("body"))
            .end()
            .end()
    }

    #[test]
    fn test_username_token_parsed() {
        let mut ctx = context(false);
        let builder = header_with(|b| {
            b.start_with(wsse("UsernameToken"), wsu_id("ut"))
                .start(wsse("Username"))
                .text("alice")
                .end()
                .start(wsse("Password"))
                .text("secret")
                .end()
                .start(QName::new(WSSE11_NS, "Salt"))
                .text("AAAAAAAAAAAAAAAAAAAAAA==")
                .end()
                .start(QName::new(WSSE11_NS, "Iteration"))
                .text("1000")
                .end()
                .end()
        });
        run(builder, &mut ctx).unwrap();

        let tokens = ctx.security.username_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].username(), "alice");
        assert_eq!(tokens[0].salt(), Some(&[0u8; 16][..]));
        assert_eq!(tokens[0].iteration(), Some(1000));
        assert_eq!(
            hex::encode(tokens[0].derive_key(None).unwrap()),
            "2d5513a4697d6ea40a90f279fe3a0dd461bb098c"
        );
        assert_eq!(ctx.security.token_kind("ut"), Some(TokenKind::UsernameToken));
        assert!(ctx.document.header_complete());
    }

    #[test]
    fn test_bad_nonce_is_invalid_token() {
        let mut ctx = context(false);
        let builder = header_with(|b| {
            b.start(wsse("UsernameToken"))
                .start(wsse("Username"))
                .text("alice")
                .end()
                .start(wsse("Nonce"))
                .text("not base64!!")
                .end()
                .end()
        });
        assert!(matches!(run(builder, &mut ctx), Err(WssError::InvalidToken(_))));
    }

    #[test]
    fn test_signature_references_registered() {
        let mut ctx = context(false);
        let builder = header_with(|b| {
            b.empty(
                wsse("BinarySecurityToken"),
                wsu_id("cert"),
            )
            .start(QName::new(DSIG_NS, "Signature"))
            .start(QName::new(DSIG_NS, "SignedInfo"))
            .empty(
                QName::new(DSIG_NS, "Reference"),
                vec![Attribute::new(QName::unqualified("URI"), "#body")],
            )
            .end()
            .start(QName::new(DSIG_NS, "KeyInfo"))
            .start(wsse("SecurityTokenReference"))
            .empty(
                wsse("Reference"),
                vec![Attribute::new(QName::unqualified("URI"), "#cert")],
            )
            .end()
            .end()
            .end()
        });
        run(builder, &mut ctx).unwrap();

        let protections = ctx.security.protections_for("body");
        assert_eq!(protections.len(), 1);
        assert_eq!(protections[0].kind, ProtectionKind::Signed);
        assert_eq!(protections[0].token.kind, Some(TokenKind::X509Token));
        assert_eq!(protections[0].token.id.as_deref(), Some("cert"));
    }

    #[test]
    fn test_signed_timestamp_emitted_retroactively() {
        let mut ctx = context(false);
        let builder = header_with(|b| {
            b.start_with(QName::new(WSU_NS, "Timestamp"), wsu_id("ts"))
                .end()
                .start(QName::new(DSIG_NS, "Signature"))
                .empty(
                    QName::new(DSIG_NS, "Reference"),
                    vec![Attribute::new(QName::unqualified("URI"), "#ts")],
                )
                .start(QName::new(DSIG_NS, "KeyInfo"))
                .empty(QName::new(DSIG_NS, "X509Data"), Vec::new())
                .end()
                .end()
        });
        run(builder, &mut ctx).unwrap();

        let events = ctx.enforcer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), SecurityEventKind::SignedElement);
        assert_eq!(events[0].token_kind(), Some(TokenKind::X509Token));
    }

    #[test]
    fn test_second_timestamp_reports_bsp_rule() {
        let mut ctx = context(true);
        let builder = header_with(|b| {
            b.empty(QName::new(WSU_NS, "Timestamp"), Vec::new())
                .empty(QName::new(WSU_NS, "Timestamp"), Vec::new())
        });
        assert!(matches!(
            run(builder, &mut ctx),
            Err(WssError::Bsp(BspRule::R3227))
        ));
    }

    #[test]
    fn test_foreign_actor_is_ignored() {
        let mut ctx = context(false);
        let builder = EventStreamBuilder::new()
            .start(soap("Envelope"))
            .start(soap("Header"))
            .start_with(
                wsse("Security"),
                vec![Attribute::new(soap("actor"), "urn:other")],
            )
            .empty(wsse("BinarySecurityToken"), wsu_id("cert"))
            .end()
            .end()
            .start(soap("Body"))
            .end()
            .end();
        run(builder, &mut ctx).unwrap();
        assert!(ctx.document.security_header().is_none());
        assert_eq!(ctx.security.token_kind("cert"), None);
        assert!(ctx.document.header_complete());
    }

    #[test]
    fn test_kerberos_value_type() {
        assert_eq!(
            token_kind_from_value_type(
                "http://docs.oasis-open.org/wss/oasis-wss-kerberos-token-profile-1.1#GSS_Kerberosv5_AP_REQ"
            ),
            Some(TokenKind::KerberosToken)
        );
        assert_eq!(token_kind_from_value_type("urn:unknown"), None);
    }

    #[test]
    fn test_timestamp_validation() {
        let processor = SecurityHeaderInputProcessor::new(
            SoapNames::soap11(),
            None,
            TimestampConfig::default(),
        );
        let now = Utc::now();
        let fresh = TimestampDraft {
            created: Some(now.to_rfc3339()),
            expires: Some((now + Duration::minutes(5)).to_rfc3339()),
        };
        assert!(processor.validate_timestamp(&fresh).is_ok());

        let expired = TimestampDraft {
            created: Some((now - Duration::minutes(10)).to_rfc3339()),
            expires: Some((now - Duration::minutes(5)).to_rfc3339()),
        };
        assert!(matches!(
            processor.validate_timestamp(&expired),
            Err(WssError::MessageExpired(_))
        ));

        let future = TimestampDraft {
            created: Some((now + Duration::hours(1)).to_rfc3339()),
            expires: None,
        };
        assert!(matches!(
            processor.validate_timestamp(&future),
            Err(WssError::InvalidTimestamp(_))
        ));

        let garbage = TimestampDraft {
            created: Some("yesterday".to_string()),
            expires: None,
        };
        assert!(matches!(
            processor.validate_timestamp(&garbage),
            Err(WssError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_timestamp_with_unbounded_skew_is_error() {
        let processor = SecurityHeaderInputProcessor::new(
            SoapNames::soap11(),
            None,
            TimestampConfig {
                future_skew_secs: 10_000_000_000_000,
                ..Default::default()
            },
        );
        let fresh = TimestampDraft {
            created: Some(Utc::now().to_rfc3339()),
            expires: None,
        };
        assert!(matches!(
            processor.validate_timestamp(&fresh),
            Err(WssError::Config(_))
        ));
    }
}
