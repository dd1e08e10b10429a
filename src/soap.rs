//! SOAP and WS-Security namespace constants and envelope structure predicates.

use crate::path::{ElementPath, QName};

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// WS-Security namespace URIs.
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSSE11_NS: &str = "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";

/// XML Signature and XML Encryption namespace URIs.
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

/// Token namespaces.
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const SAML1_NS: &str = "urn:oasis:names:tc:SAML:1.0:assertion";
pub const WSC_NS: &str = "http://schemas.xmlsoap.org/ws/2005/02/sc";
pub const WSC13_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512";

/// WS-SecurityPolicy 1.2 namespace.
pub const SP_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-securitypolicy/200702";

/// The namespace bound to the reserved `xml` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// `xenc:EncryptedData/@Type` values.
pub const XENC_TYPE_CONTENT: &str = "http://www.w3.org/2001/04/xmlenc#Content";
pub const XENC_TYPE_ELEMENT: &str = "http://www.w3.org/2001/04/xmlenc#Element";

/// `wsse:BinarySecurityToken/@ValueType` fragment identifying Kerberos tickets.
pub const KERBEROS_VALUE_TYPE_MARKER: &str = "Kerberosv5";

/// Prefixes usable in element path patterns without an explicit declaration.
pub fn builtin_namespace(prefix: &str) -> Option<&'static str> {
    match prefix {
        "S11" | "soap" => Some(SOAP_11_NS),
        "S12" | "soap12" => Some(SOAP_12_NS),
        "wsse" => Some(WSSE_NS),
        "wsse11" => Some(WSSE11_NS),
        "wsu" => Some(WSU_NS),
        "ds" => Some(DSIG_NS),
        "xenc" => Some(XENC_NS),
        "saml" => Some(SAML_NS),
        "sp" => Some(SP_NS),
        "xml" => Some(XML_NS),
        _ => None,
    }
}

/// Qualified names of the SOAP envelope structure for one SOAP version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapNames {
    envelope: QName,
    header: QName,
    body: QName,
}

impl SoapNames {
    /// Build names from the envelope namespace and envelope local name.
    pub fn new(namespace: impl Into<String>, envelope_local_name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            envelope: QName::new(namespace.clone(), envelope_local_name),
            header: QName::new(namespace.clone(), "Header"),
            body: QName::new(namespace, "Body"),
        }
    }

    pub fn soap11() -> Self {
        Self::new(SOAP_11_NS, "Envelope")
    }

    pub fn soap12() -> Self {
        Self::new(SOAP_12_NS, "Envelope")
    }

    pub fn namespace(&self) -> &str {
        &self.envelope.namespace
    }

    pub fn envelope(&self) -> &QName {
        &self.envelope
    }

    pub fn header(&self) -> &QName {
        &self.header
    }

    pub fn body(&self) -> &QName {
        &self.body
    }

    /// True when the path runs through the SOAP Header (the Header itself included).
    pub fn is_in_soap_header(&self, path: &ElementPath) -> bool {
        path.len() > 1 && path.get(1) == Some(&self.header)
    }

    /// True when the path runs through the SOAP Body (the Body itself included).
    pub fn is_in_soap_body(&self, path: &ElementPath) -> bool {
        path.len() > 1 && path.get(1) == Some(&self.body)
    }

    /// A direct child of the SOAP Header.
    pub fn is_header_part(&self, path: &ElementPath) -> bool {
        path.len() == 3 && self.is_in_soap_header(path)
    }

    /// The SOAP Body or one of its direct children.
    pub fn is_body_part(&self, path: &ElementPath) -> bool {
        (path.len() == 2 || path.len() == 3) && self.is_in_soap_body(path)
    }

    /// The SOAP Body element itself.
    pub fn is_body(&self, path: &ElementPath) -> bool {
        path.len() == 2 && self.is_in_soap_body(path)
    }
}

impl Default for SoapNames {
    fn default() -> Self {
        Self::soap11()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(names: &[&str]) -> ElementPath {
        ElementPath::new(names.iter().map(|n| QName::new(SOAP_11_NS, *n)).collect())
    }

    #[test]
    fn test_header_and_body_predicates() {
        let soap = SoapNames::soap11();
        assert!(soap.is_header_part(&path(&["Envelope", "Header", "Timestamp"])));
        assert!(!soap.is_header_part(&path(&["Envelope", "Header"])));
        assert!(soap.is_body(&path(&["Envelope", "Body"])));
        assert!(soap.is_body_part(&path(&["Envelope", "Body", "GetUser"])));
        assert!(!soap.is_body_part(&path(&["Envelope", "Body", "GetUser", "Id"])));
        assert!(!soap.is_in_soap_body(&path(&["Envelope"])));
    }

    #[test]
    fn test_soap12_names_do_not_match_soap11_paths() {
        let soap = SoapNames::soap12();
        assert!(!soap.is_in_soap_body(&path(&["Envelope", "Body"])));
        assert_eq!(soap.namespace(), SOAP_12_NS);
    }

    #[test]
    fn test_builtin_prefixes() {
        assert_eq!(builtin_namespace("wsu"), Some(WSU_NS));
        assert_eq!(builtin_namespace("S12"), Some(SOAP_12_NS));
        assert_eq!(builtin_namespace("unknown"), None);
    }
}
