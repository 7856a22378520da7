//! # CSR Inspection
//!
//! Parses a PEM certificate signing request, checks its self-signature and
//! extracts the DNS names it asks for. Everything here runs before any
//! network traffic.

use super::error::CaError;
use super::hostnames::{canonicalize, is_valid_hostname};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

const CSR_PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// Names requested by a CSR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrNames {
    /// DNS names from the subjectAltName extension
    pub dns_names: Vec<String>,
    /// Subject common name, when present
    pub common_name: Option<String>,
}

impl CsrNames {
    /// Hostnames the CSR requests: SAN DNS names plus a hostname-shaped CN
    pub fn hostnames(&self) -> Vec<String> {
        let mut names = self.dns_names.clone();
        if let Some(cn) = &self.common_name {
            let cn = canonicalize(cn);
            if is_valid_hostname(&cn) {
                names.push(cn);
            }
        }
        names
    }
}

/// Parse and verify a PEM encoded CSR
pub fn inspect_csr(csr_pem: &[u8]) -> Result<CsrNames, CaError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(csr_pem)
        .map_err(|e| CaError::validation(format!("CSR is not valid PEM: {e}")))?;
    if pem.label != CSR_PEM_LABEL {
        return Err(CaError::validation(format!(
            "PEM block is '{}', expected '{CSR_PEM_LABEL}'",
            pem.label
        )));
    }

    let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
        .map_err(|e| CaError::validation(format!("CSR could not be parsed: {e}")))?;
    csr.verify_signature()
        .map_err(|e| CaError::validation(format!("CSR signature is invalid: {e}")))?;

    let common_name = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToString::to_string);

    let mut dns_names = Vec::new();
    for extension in csr.requested_extensions().into_iter().flatten() {
        let ParsedExtension::SubjectAlternativeName(san) = extension else {
            continue;
        };
        for name in &san.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push(canonicalize(dns)),
                GeneralName::IPAddress(_) => {
                    return Err(CaError::validation(
                        "IP address subject alternative names are not supported",
                    ));
                }
                GeneralName::URI(uri) => {
                    return Err(CaError::validation(format!(
                        "URI subject alternative name '{uri}' is not supported"
                    )));
                }
                GeneralName::RFC822Name(email) => {
                    return Err(CaError::validation(format!(
                        "email subject alternative name '{email}' is not supported"
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(CsrNames {
        dns_names,
        common_name,
    })
}
