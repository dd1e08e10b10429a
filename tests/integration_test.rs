//! Integration tests for the zentinel-wss-policy crate.
//!
//! These tests exercise the public API surface end-to-end, combining
//! parsing, header processing, policy enforcement and configuration.

use chrono::{Duration, SecondsFormat, Utc};
use zentinel_wss_policy::bsp::BspRule;
use zentinel_wss_policy::config::FailAction;
use zentinel_wss_policy::derivation::{DEFAULT_LABEL, DERIVED_KEY_LEN};
use zentinel_wss_policy::error::{soap_fault_response, SoapFaultVersion};
use zentinel_wss_policy::security_event::{SecurityEventKind, TokenKind};
use zentinel_wss_policy::soap::{
    SoapNames, DSIG_NS, SOAP_11_NS, WSSE11_NS, WSSE_NS, WSU_NS, XENC_NS,
};
use zentinel_wss_policy::{
    derive_key_from_password, derive_secret_key, p_sha1, AgentDecision, MessageOptions, Policy,
    PolicyValidator, UsernameToken, Verdict, WssError, WssPolicyAgent, WssPolicyConfig,
};

// ============================================================================
// Helpers: SOAP 1.1 messages with a configurable security header
// ============================================================================

fn fresh_timestamp() -> String {
    let created = Utc::now();
    let expires = created + Duration::minutes(5);
    format!(
        r#"<wsu:Timestamp wsu:Id="ts">
        <wsu:Created>{}</wsu:Created>
        <wsu:Expires>{}</wsu:Expires>
      </wsu:Timestamp>"#,
        created.to_rfc3339_opts(SecondsFormat::Secs, true),
        expires.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn envelope(security: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{soap}" xmlns:wsse="{wsse}" xmlns:wsse11="{wsse11}"
               xmlns:wsu="{wsu}" xmlns:ds="{ds}" xmlns:xenc="{xenc}">
  <soap:Header>
    <wsse:Security soap:mustUnderstand="1">
      {security}
    </wsse:Security>
    <wsa:To xmlns:wsa="http://www.w3.org/2005/08/addressing">urn:orders</wsa:To>
  </soap:Header>
  <soap:Body wsu:Id="body">
    {body}
  </soap:Body>
</soap:Envelope>"#,
        soap = SOAP_11_NS,
        wsse = WSSE_NS,
        wsse11 = WSSE11_NS,
        wsu = WSU_NS,
        ds = DSIG_NS,
        xenc = XENC_NS,
        security = security,
        body = body
    )
}

const ORDER: &str = r#"<m:PlaceOrder xmlns:m="urn:orders"><m:Item>Apples</m:Item></m:PlaceOrder>"#;

fn signed_request() -> String {
    let security = format!(
        r##"<wsse:BinarySecurityToken wsu:Id="cert"
          ValueType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-x509-token-profile-1.0#X509v3"
          EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">MIIB</wsse:BinarySecurityToken>
      {}
      <ds:Signature>
        <ds:SignedInfo>
          <ds:Reference URI="#body"/>
          <ds:Reference URI="#ts"/>
        </ds:SignedInfo>
        <ds:SignatureValue>c2ln</ds:SignatureValue>
        <ds:KeyInfo>
          <wsse:SecurityTokenReference><wsse:Reference URI="#cert"/></wsse:SecurityTokenReference>
        </ds:KeyInfo>
      </ds:Signature>"##,
        fresh_timestamp()
    );
    envelope(&security, ORDER)
}

fn encrypted_request() -> String {
    let security = format!(
        r##"<wsse:BinarySecurityToken wsu:Id="cert">MIIB</wsse:BinarySecurityToken>
      {}
      <xenc:EncryptedKey>
        <ds:KeyInfo>
          <wsse:SecurityTokenReference><wsse:Reference URI="#cert"/></wsse:SecurityTokenReference>
        </ds:KeyInfo>
        <xenc:CipherData><xenc:CipherValue>a2V5</xenc:CipherValue></xenc:CipherData>
        <xenc:ReferenceList><xenc:DataReference URI="#ed"/></xenc:ReferenceList>
      </xenc:EncryptedKey>"##,
        fresh_timestamp()
    );
    let body = r#"<xenc:EncryptedData Id="ed" Type="http://www.w3.org/2001/04/xmlenc#Content">
      <xenc:CipherData><xenc:CipherValue>Y2lwaGVy</xenc:CipherValue></xenc:CipherData>
    </xenc:EncryptedData>"#;
    envelope(&security, body)
}

fn config(policy_yaml: &str) -> WssPolicyConfig {
    WssPolicyConfig {
        policy: serde_yaml::from_str(policy_yaml).unwrap(),
        ..Default::default()
    }
}

fn validate(policy_yaml: &str, message: &str) -> Verdict {
    PolicyValidator::new(config(policy_yaml))
        .unwrap()
        .validate(message.as_bytes())
        .unwrap()
        .verdict
}

// ============================================================================
// End-to-end: asymmetric binding style policies
// ============================================================================

const ASYMMETRIC_POLICY: &str = r#"
- include_timestamp
- signed_parts: { body: true }
- signed_elements:
    paths: [ "/soap:Envelope/soap:Header/wsse:Security/wsu:Timestamp" ]
    namespaces:
      soap: http://schemas.xmlsoap.org/soap/envelope/
      wsse: http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd
      wsu: http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd
- wrapper:
    kind: initiator_token
    policy:
      - token: { kind: x509_token }
"#;

#[test]
fn test_e2e_signed_request_satisfies_asymmetric_policy() {
    let validator = PolicyValidator::new(config(ASYMMETRIC_POLICY)).unwrap();
    let result = validator.validate(signed_request().as_bytes()).unwrap();
    assert_eq!(result.verdict, Verdict::Satisfied);

    let signed_body = result.events.iter().find(|e| {
        e.kind() == SecurityEventKind::SignedPart && SoapNames::soap11().is_body(e.path())
    });
    assert_eq!(
        signed_body.and_then(|e| e.token_kind()),
        Some(TokenKind::X509Token)
    );
}

#[test]
fn test_e2e_unsigned_body_violates() {
    let message = envelope(&fresh_timestamp(), ORDER);
    match validate("- signed_parts: { body: true }", &message) {
        Verdict::Violated(violation) => {
            let failure = violation.failures_for("SignedParts").next().unwrap();
            assert_eq!(failure.alternative, 0);
            let path = failure.path.as_ref().unwrap();
            assert!(path.last().unwrap().is(SOAP_11_NS, "Body"));
        }
        other => panic!("expected violation, got {:?}", other),
    }
}

#[test]
fn test_e2e_wrong_token_kind_violates() {
    let policy = r#"
- wrapper:
    kind: initiator_token
    policy:
      - token: { kind: saml_token }
"#;
    assert!(matches!(
        validate(policy, &signed_request()),
        Verdict::Violated(_)
    ));
}

#[test]
fn test_e2e_encrypted_body_satisfies_encrypted_parts() {
    let policy = r#"
- encrypted_parts: { body: true }
- wrapper:
    kind: recipient_token
    policy:
      - token: { kind: x509_token }
"#;
    assert_eq!(validate(policy, &encrypted_request()), Verdict::Satisfied);
}

#[test]
fn test_e2e_plain_body_violates_encrypted_parts() {
    let message = envelope(&fresh_timestamp(), ORDER);
    assert!(matches!(
        validate("- encrypted_parts: { body: true }", &message),
        Verdict::Violated(_)
    ));
}

// ============================================================================
// End-to-end: content-encrypted elements
// ============================================================================

const CARD_POLICY: &str = r#"
- content_encrypted_elements:
    paths: [ "/soap:Envelope/soap:Body/m:PlaceOrder/m:Card" ]
    namespaces:
      soap: http://schemas.xmlsoap.org/soap/envelope/
      m: urn:orders
"#;

fn card_request(card: &str) -> String {
    let security = format!(
        r##"<wsse:BinarySecurityToken wsu:Id="cert">MIIB</wsse:BinarySecurityToken>
      {}
      <xenc:EncryptedKey>
        <ds:KeyInfo>
          <wsse:SecurityTokenReference><wsse:Reference URI="#cert"/></wsse:SecurityTokenReference>
        </ds:KeyInfo>
        <xenc:ReferenceList><xenc:DataReference URI="#card"/></xenc:ReferenceList>
      </xenc:EncryptedKey>"##,
        fresh_timestamp()
    );
    let body = format!(
        r#"<m:PlaceOrder xmlns:m="urn:orders"><m:Card>{}</m:Card></m:PlaceOrder>"#,
        card
    );
    envelope(&security, &body)
}

#[test]
fn test_e2e_content_encrypted_card_satisfied() {
    let card = r#"<xenc:EncryptedData Id="card" Type="http://www.w3.org/2001/04/xmlenc#Content">
        <xenc:CipherData><xenc:CipherValue>Y2FyZA==</xenc:CipherValue></xenc:CipherData>
      </xenc:EncryptedData>"#;
    let validator = PolicyValidator::new(config(CARD_POLICY)).unwrap();
    let result = validator.validate(card_request(card).as_bytes()).unwrap();
    assert_eq!(result.verdict, Verdict::Satisfied);

    let card_event = result
        .events
        .iter()
        .find(|e| {
            e.kind() == SecurityEventKind::ContentEncryptedElement
                && e.path().last().is_some_and(|n| n.is("urn:orders", "Card"))
        })
        .unwrap();
    assert_eq!(card_event.token_kind(), Some(TokenKind::X509Token));
}

#[test]
fn test_e2e_plaintext_card_violates_content_encryption() {
    let Verdict::Violated(violation) = validate(CARD_POLICY, &card_request("4111111111111111")) else {
        panic!("expected violation");
    };
    let failure = violation
        .failures_for("ContentEncryptedElements")
        .next()
        .unwrap();
    let path = failure.path.as_ref().unwrap();
    assert!(path.last().unwrap().is("urn:orders", "Card"));
}

// ============================================================================
// End-to-end: alternatives
// ============================================================================

#[test]
fn test_e2e_second_alternative_satisfied() {
    let policy = r#"
- exactly_one:
    - all: [ { token: { kind: kerberos_token } } ]
    - all: [ include_timestamp, { signed_parts: { body: true } } ]
"#;
    assert_eq!(validate(policy, &signed_request()), Verdict::Satisfied);
}

#[test]
fn test_e2e_all_alternatives_fail_reports_each() {
    let policy = r#"
- exactly_one:
    - all: [ { token: { kind: kerberos_token } } ]
    - all: [ { token: { kind: saml_token } } ]
"#;
    let Verdict::Violated(violation) = validate(policy, &signed_request()) else {
        panic!("expected violation");
    };
    let alternatives: Vec<usize> = violation.failures.iter().map(|f| f.alternative).collect();
    assert_eq!(alternatives, vec![0, 1]);
}

#[test]
fn test_e2e_optional_assertion_may_be_absent() {
    let message = envelope("", ORDER);
    assert_eq!(
        validate("- optional: include_timestamp", &message),
        Verdict::Satisfied
    );
}

#[test]
fn test_e2e_empty_exactly_one_never_satisfied() {
    let policy: Policy = serde_yaml::from_str("- exactly_one: []").unwrap();
    assert!(policy.normalize().is_empty());
    assert!(matches!(
        validate("- exactly_one: []", &signed_request()),
        Verdict::Violated(_)
    ));
}

// ============================================================================
// End-to-end: transport security
// ============================================================================

#[test]
fn test_e2e_transport_security_satisfies_protection() {
    let mut config = config("- signed_parts: { body: true }\n- encrypted_parts: { body: true }");
    config.transport.security_active = true;
    let validator = PolicyValidator::new(config).unwrap();

    let message = envelope(&fresh_timestamp(), ORDER);
    let result = validator.validate(message.as_bytes()).unwrap();
    assert_eq!(result.verdict, Verdict::Satisfied);
    assert!(result.events.iter().all(|e| e.kind().is_required()));
}

#[test]
fn test_e2e_transport_security_keeps_required_parts() {
    let policy = "- required_parts:\n    headers:\n      - { namespace: \"urn:missing\", name: Header }";
    let validator = PolicyValidator::new(config(policy)).unwrap();
    let options = MessageOptions {
        transport_security_active: Some(true),
        ..Default::default()
    };
    let result = validator
        .validate_with(signed_request().as_bytes(), options)
        .unwrap();
    assert!(matches!(result.verdict, Verdict::Violated(_)));
}

// ============================================================================
// End-to-end: Basic Security Profile
// ============================================================================

#[test]
fn test_e2e_bsp_enforced_duplicate_timestamp() {
    let security = format!("{}{}", fresh_timestamp(), fresh_timestamp());
    let message = envelope(&security, ORDER);

    let lenient = PolicyValidator::new(config("[]")).unwrap();
    assert!(lenient
        .validate(message.as_bytes())
        .unwrap()
        .verdict
        .is_satisfied());

    let mut strict = config("[]");
    strict.bsp.enforce = true;
    let strict = PolicyValidator::new(strict).unwrap();
    assert!(matches!(
        strict.validate(message.as_bytes()),
        Err(WssError::Bsp(BspRule::R3227))
    ));
}

#[test]
fn test_e2e_bsp_ignored_rule() {
    let security = format!("{}{}", fresh_timestamp(), fresh_timestamp());
    let message = envelope(&security, ORDER);
    let mut config = config("[]");
    config.bsp.enforce = true;
    config.bsp.ignored_rules = vec![BspRule::R3227];
    let validator = PolicyValidator::new(config).unwrap();
    assert!(validator.validate(message.as_bytes()).is_ok());
}

// ============================================================================
// End-to-end: malformed and hostile input
// ============================================================================

#[test]
fn test_e2e_malformed_xml_incomplete() {
    let message = signed_request();
    let truncated = &message[..message.len() - 30];
    let validator = PolicyValidator::new(config("[]")).unwrap();
    let result = validator.validate(truncated.as_bytes()).unwrap();
    assert!(matches!(result.verdict, Verdict::Incomplete(_)));
}

#[test]
fn test_e2e_xxe_doctype_incomplete() {
    let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>&xxe;</soap:Body>
</soap:Envelope>"#;
    let verdict = validate("[]", xml);
    assert!(matches!(verdict, Verdict::Incomplete(reason) if reason.contains("DOCTYPE")));
}

#[test]
fn test_e2e_non_soap_document_incomplete() {
    let verdict = validate("[]", "<html><body>hello</body></html>");
    assert!(matches!(verdict, Verdict::Incomplete(_)));
}

// ============================================================================
// Policy configuration
// ============================================================================

#[test]
fn test_e2e_config_from_yaml_and_validate() {
    let yaml = r#"
version: "1"
settings:
  fail_action: block
  max_body_size: 65536
timestamp:
  max_age_secs: 600
bsp:
  enforce: true
policy:
  - include_timestamp
  - signed_parts:
      body: true
      headers:
        - namespace: http://www.w3.org/2005/08/addressing
  - wrapper:
      kind: signature_token
      policy:
        - token: { kind: x509_token }
"#;
    let config = WssPolicyConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.settings.fail_action, FailAction::Block);
    assert_eq!(config.timestamp.max_age_secs, 600);

    let validator = PolicyValidator::new(config).unwrap();
    assert_eq!(validator.alternatives().len(), 1);
    assert_eq!(validator.alternatives()[0].assertions().len(), 3);

    // wsa:To is a covered header but is not signed
    let result = validator.validate(signed_request().as_bytes()).unwrap();
    let Verdict::Violated(violation) = result.verdict else {
        panic!("expected violation");
    };
    let failure = violation.failures_for("SignedParts").next().unwrap();
    let path = failure.path.as_ref().unwrap();
    assert_eq!(path.last().unwrap().local_name, "To");
}

#[test]
fn test_e2e_wrapper_with_two_tokens_rejected() {
    let yaml = r#"
policy:
  - wrapper:
      kind: protection_token
      policy:
        - token: { kind: x509_token }
        - token: { kind: username_token }
"#;
    let result = WssPolicyConfig::from_yaml_str(yaml);
    assert!(matches!(result, Err(WssError::Config(_))));
}

#[test]
fn test_e2e_unknown_assertion_rejected() {
    let result = WssPolicyConfig::from_yaml_str("policy:\n  - signed_everything");
    assert!(matches!(result, Err(WssError::Config(_))));
}

// ============================================================================
// UsernameToken key derivation
// ============================================================================

#[test]
fn test_e2e_password_key_vector() {
    let key = derive_key_from_password("secret", &[0u8; 16], 1000);
    assert_eq!(key.len(), DERIVED_KEY_LEN);
    assert_eq!(hex::encode(key), "2d5513a4697d6ea40a90f279fe3a0dd461bb098c");
}

#[test]
fn test_e2e_username_token_from_message_derives_key() {
    let security = r#"<wsse:UsernameToken wsu:Id="ut">
        <wsse:Username>alice</wsse:Username>
        <wsse11:Salt>AAAAAAAAAAAAAAAAAAAAAA==</wsse11:Salt>
        <wsse11:Iteration>1000</wsse11:Iteration>
      </wsse:UsernameToken>"#;
    let validator = PolicyValidator::new(config("- token: { kind: username_token }")).unwrap();
    let result = validator
        .validate(envelope(security, ORDER).as_bytes())
        .unwrap();
    assert!(result.verdict.is_satisfied());

    let parsed = &result.username_tokens[0];
    let token = UsernameToken::new(parsed.username(), "secret")
        .with_salt(parsed.salt().unwrap().to_vec())
        .with_iteration(parsed.iteration().unwrap());
    let key = token.derive_key(None).unwrap();
    assert_eq!(hex::encode(key), "2d5513a4697d6ea40a90f279fe3a0dd461bb098c");
}

#[test]
fn test_e2e_secret_key_vector() {
    let nonce: Vec<u8> = (0u8..16).collect();
    let key = derive_secret_key(b"secret", DEFAULT_LABEL, &nonce, "2024-01-01T00:00:00Z", 32).unwrap();
    assert_eq!(
        hex::encode(key),
        "286074ecbb3fe6b8f2d3bac30487328a6eec7f7dfe8667356942d80ef00597f2"
    );
}

#[test]
fn test_e2e_p_sha1_prefix_stable_and_empty() {
    let long = p_sha1(b"key", b"seed", 64).unwrap();
    let short = p_sha1(b"key", b"seed", 20).unwrap();
    assert_eq!(&long[..20], &short[..]);
    assert!(p_sha1(b"key", b"seed", 0).unwrap().is_empty());
}

// ============================================================================
// Agent: block and allow decisions
// ============================================================================

#[test]
fn test_e2e_agent_blocks_with_soap_fault() {
    let agent = WssPolicyAgent::new(config(ASYMMETRIC_POLICY)).unwrap();

    let ok = agent.process_message(signed_request().as_bytes(), MessageOptions::default());
    assert_eq!(ok.header("X-WSS-Policy"), Some("satisfied"));

    let unsigned = envelope(&fresh_timestamp(), ORDER);
    let blocked = agent.process_message(unsigned.as_bytes(), MessageOptions::default());
    let AgentDecision::Block { status, body, .. } = blocked else {
        panic!("expected block");
    };
    assert_eq!(status, 500);
    assert!(body.contains("<faultcode>wsse:InvalidSecurity</faultcode>"));
    assert!(body.contains("zwsp:failure"));

    let metrics = agent.metrics();
    assert_eq!(metrics.messages_processed, 2);
    assert_eq!(metrics.messages_blocked, 1);
}

#[test]
fn test_e2e_agent_hot_reload() {
    let agent = WssPolicyAgent::new(config("[]")).unwrap();
    let unsigned = envelope("", ORDER);
    assert!(!agent
        .process_message(unsigned.as_bytes(), MessageOptions::default())
        .is_block());

    agent
        .on_configure(serde_json::json!({ "policy": [ { "signed_parts": { "body": true } } ] }))
        .unwrap();
    assert!(agent
        .process_message(unsigned.as_bytes(), MessageOptions::default())
        .is_block());
}

#[test]
fn test_e2e_fault_for_expired_message() {
    let error = WssError::MessageExpired("created 2 hours ago".to_string());
    let fault = soap_fault_response(&error, SoapFaultVersion::Soap12);
    assert!(fault.contains("http://www.w3.org/2003/05/soap-envelope"));
    assert!(fault.contains("wsse:MessageExpired"));
    assert!(fault.contains("created 2 hours ago"));
}
