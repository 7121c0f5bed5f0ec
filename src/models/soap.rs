use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::DokuwebError;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP_ENC_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// RPC-style SOAP 1.1 transport for the dokuweb ticket service.
///
/// The service only ever exchanges string parameters and a single string
/// return value, so the whole transport is an envelope template plus a
/// regex that pulls `<operation>Return` out of the response. A WSDL-driven
/// client would be overkill for two operations.
pub struct SoapClient {
    http: Client,
    endpoint: String,
}

impl SoapClient {
    /// One-time connection setup. Called through the client's
    /// single-initialization guard so concurrent first calls share one
    /// handle.
    pub async fn connect(endpoint: &str) -> Result<Self, DokuwebError> {
        let http = Client::builder().build()?;
        debug!("SOAP handle created for {}", endpoint);
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    /// Invokes `operation` with positional string parameters and returns
    /// the decoded `<operation>Return` string.
    pub async fn call(
        &self,
        operation: &'static str,
        params: &[(&str, &str)],
    ) -> Result<String, DokuwebError> {
        let envelope = build_envelope(operation, params);
        debug!("SOAP request to {}: {}", self.endpoint, operation);

        let body = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{operation}\""))
            .body(envelope)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        extract_return(operation, &body)
    }
}

fn build_envelope(operation: &str, params: &[(&str, &str)]) -> String {
    let mut parts = String::new();
    for (name, value) in params {
        parts.push_str(&format!(
            "      <{name} xsi:type=\"xsd:string\">{}</{name}>\n",
            xml_escape(value)
        ));
    }
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<soapenv:Envelope xmlns:soapenv=\"{env}\"",
            " xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\"",
            " xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n",
            "  <soapenv:Body>\n",
            "    <{op} soapenv:encodingStyle=\"{enc}\">\n",
            "{params}",
            "    </{op}>\n",
            "  </soapenv:Body>\n",
            "</soapenv:Envelope>\n",
        ),
        env = SOAP_ENV_NS,
        enc = SOAP_ENC_NS,
        op = operation,
        params = parts,
    )
}

fn return_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?(\w+)Return[^>]*>(.*?)</(?:\w+:)?\w+Return>").unwrap()
    })
}

fn extract_return(operation: &'static str, body: &str) -> Result<String, DokuwebError> {
    return_re()
        .captures_iter(body)
        .find(|caps| &caps[1] == operation)
        .map(|caps| xml_unescape(&caps[2]))
        .ok_or_else(|| {
            DokuwebError::parse(operation, format!("no {operation}Return element in response"))
        })
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
