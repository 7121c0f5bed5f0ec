use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::DokuwebConfig;
use crate::error::DokuwebError;

use super::soap::SoapClient;
use super::xml::{self, TicketAttrs};

/// Marker the remote createTicket operation prefixes to a successful
/// pipe-delimited return value.
const CREATE_SUCCESS: &str = "true";

/// RFC 3986 unreserved characters stay raw, everything else is encoded.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Client for one dokuweb session.
///
/// The service splits its API across two transports: ticket creation and
/// keyword lookup go over SOAP RPC, ticket reads and searches over plain
/// HTTP returning XML. The client mirrors that split instead of papering
/// over it. Session state (the auth token and the SOAP handle) is owned by
/// the instance; nothing is shared across clients.
pub struct DokuwebClient {
    base_url: String,
    soap_endpoint: String,
    username: String,
    password: String,
    default_ticketsystem: Option<String>,
    token: Option<String>,
    soap: OnceCell<SoapClient>,
    http: Client,
}

/// Parameters for `createTicket`. Subject, partner and keyword are
/// mandatory on the remote side; everything else falls back to the
/// service's defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub partner: String,
    pub keyword: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Submission channel, "POST" when unset
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Ticket type, "1" when unset
    #[serde(default)]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub plz: Option<String>,
    #[serde(default)]
    pub ticketgroup: Option<String>,
    /// Pre-rendered field-values blob, passed through verbatim
    #[serde(default)]
    pub fieldvalues: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub ticketsystem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedTicket {
    pub ticketid: String,
    pub ticketnr: String,
}

/// One keyword record from getKeywords. The remote service owns the
/// schema; fields it adds beyond the recognized ones are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    #[serde(rename = "KEYWORD")]
    pub keyword: String,
    #[serde(rename = "CATEGORY", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "TICKETTYPE", default, skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
    #[serde(rename = "TICKETGROUP", default, skip_serializing_if = "Option::is_none")]
    pub ticket_group: Option<String>,
    #[serde(rename = "PROCESS", default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(rename = "DESCRIPTION", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct KeywordsEnvelope {
    #[serde(rename = "SUCCESS")]
    success: bool,
    #[serde(rename = "DATA", default)]
    data: Vec<Keyword>,
    #[serde(rename = "ERRORTEXT")]
    errortext: Option<String>,
}

impl DokuwebClient {
    pub fn new(cfg: &DokuwebConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            soap_endpoint: cfg.soap_endpoint.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            default_ticketsystem: cfg.ticketsystem.clone(),
            token: None,
            soap: OnceCell::new(),
            http: Client::new(),
        }
    }

    /// The session token, if `authenticate()` has succeeded.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Fetches a session token with Basic credentials and stores it for
    /// all subsequent calls. No expiry tracking: the token is assumed
    /// valid until the process restarts or the password changes.
    pub async fn authenticate(&mut self) -> Result<(), DokuwebError> {
        let url = format!("{}/dokuweb/auth/token", self.base_url);
        debug!("fetching auth token from {}", url);

        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| DokuwebError::Authentication {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DokuwebError::Authentication {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = resp.text().await.map_err(|e| DokuwebError::Authentication {
            status: status.as_u16(),
            reason: e.to_string(),
        })?;
        let token = body.trim().to_string();
        if token.is_empty() {
            return Err(DokuwebError::Authentication {
                status: status.as_u16(),
                reason: "empty token body".to_string(),
            });
        }

        info!("authenticated against {}", self.base_url);
        self.token = Some(token);
        Ok(())
    }

    /// Creates a ticket via SOAP and returns its id and number.
    pub async fn create_ticket(
        &self,
        req: &CreateTicketRequest,
    ) -> Result<CreatedTicket, DokuwebError> {
        let token = self.require_token()?;
        let soap = self.soap().await?;

        let ticketsystem = req
            .ticketsystem
            .as_deref()
            .or(self.default_ticketsystem.as_deref())
            .unwrap_or("");
        let params = [
            ("authToken", token),
            ("sSubject", req.subject.as_str()),
            ("sPartner", req.partner.as_str()),
            ("sKeyword", req.keyword.as_str()),
            ("sCategory", req.category.as_deref().unwrap_or("")),
            ("sChannel", req.channel.as_deref().unwrap_or("POST")),
            ("sDescription", req.description.as_deref().unwrap_or("")),
            ("sType", req.ticket_type.as_deref().unwrap_or("1")),
            ("sPLZ", req.plz.as_deref().unwrap_or("")),
            ("sTicketgroup", req.ticketgroup.as_deref().unwrap_or("")),
            ("sFieldvalues", req.fieldvalues.as_deref().unwrap_or("")),
            ("sPriority", req.priority.as_deref().unwrap_or("")),
            ("sTicketsystem", ticketsystem),
        ];

        let ret = soap.call("createTicket", &params).await?;
        let created = parse_create_ticket_return(&ret)?;
        info!(
            "created ticket {} ({})",
            created.ticketnr, created.ticketid
        );
        Ok(created)
    }

    /// Lists the keywords a ticket may reference, optionally filtered by
    /// channel and ticket system.
    pub async fn get_keywords(
        &self,
        channel: Option<&str>,
        ticketsystem: Option<&str>,
    ) -> Result<Vec<Keyword>, DokuwebError> {
        let token = self.require_token()?;
        let soap = self.soap().await?;

        let ticketsystem = ticketsystem
            .or(self.default_ticketsystem.as_deref())
            .unwrap_or("");
        let params = [
            ("authToken", token),
            ("sChannel", channel.unwrap_or("")),
            ("sTicketsystem", ticketsystem),
        ];

        let ret = soap.call("getKeywords", &params).await?;
        parse_keywords_return(&ret)
    }

    /// Fetches one ticket's attributes. A response without a `<ticket>`
    /// element is a not-found failure.
    pub async fn get_ticket_details(&self, ticketid: &str) -> Result<TicketAttrs, DokuwebError> {
        let token = self.require_token()?;
        let url = format!("{}/dokuweb/ticket/{}", self.base_url, ticketid);

        let body = self
            .http
            .get(&url)
            .query(&[("authtoken", token)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        ticket_details_from_body(ticketid, &body)
    }

    /// Searches tickets created by `login`. No match is an empty Vec,
    /// not an error. `start` and `max` are handed to the service as-is
    /// (defaults 1 and 10).
    pub async fn search_tickets_by_creator(
        &self,
        login: &str,
        start: Option<u32>,
        max: Option<u32>,
    ) -> Result<Vec<TicketAttrs>, DokuwebError> {
        let token = self.require_token()?;
        let url = search_tickets_url(
            &self.base_url,
            token,
            login,
            start.unwrap_or(1),
            max.unwrap_or(10),
        );

        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(xml::extract_tickets(&body))
    }

    fn require_token(&self) -> Result<&str, DokuwebError> {
        self.token.as_deref().ok_or(DokuwebError::Precondition(
            "authenticate() must succeed before ticket operations",
        ))
    }

    /// The SOAP handle, created on first use. `OnceCell` makes concurrent
    /// first calls wait on one setup instead of opening duplicates.
    async fn soap(&self) -> Result<&SoapClient, DokuwebError> {
        self.soap
            .get_or_try_init(|| SoapClient::connect(&self.soap_endpoint))
            .await
    }
}

/// The search query is assembled by hand: the service's observed contract
/// is the raw string `f1_op==`, and a query serializer would encode the
/// operator value as `%3D`. Only the token and login are caller-supplied
/// and get percent-encoded.
fn search_tickets_url(base_url: &str, token: &str, login: &str, start: u32, max: u32) -> String {
    format!(
        "{base_url}/dokuweb/tickets/?authtoken={token}&start={start}&max={max}\
         &field_count=1&f1=CREATE_BY&f1_op==&f1_val={login}",
        token = utf8_percent_encode(token, QUERY_VALUE),
        login = utf8_percent_encode(login, QUERY_VALUE),
    )
}

fn ticket_details_from_body(ticketid: &str, body: &str) -> Result<TicketAttrs, DokuwebError> {
    xml::extract_ticket(body).ok_or_else(|| {
        DokuwebError::parse("getTicketDetails", format!("ticket {ticketid} not found"))
    })
}

fn parse_create_ticket_return(ret: &str) -> Result<CreatedTicket, DokuwebError> {
    let mut parts = ret.splitn(3, '|');
    if parts.next().unwrap_or("") != CREATE_SUCCESS {
        return Err(DokuwebError::remote("createTicket", ret));
    }
    let ticketid = parts
        .next()
        .ok_or_else(|| DokuwebError::parse("createTicket", format!("malformed return: {ret}")))?;
    let ticketnr = parts
        .next()
        .ok_or_else(|| DokuwebError::parse("createTicket", format!("malformed return: {ret}")))?;
    Ok(CreatedTicket {
        ticketid: ticketid.to_string(),
        ticketnr: ticketnr.to_string(),
    })
}

fn parse_keywords_return(ret: &str) -> Result<Vec<Keyword>, DokuwebError> {
    let envelope: KeywordsEnvelope = {
        let mut deserializer = serde_json::Deserializer::from_str(ret);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| DokuwebError::parse("getKeywords", e.to_string()))?
    };

    if !envelope.success {
        return Err(DokuwebError::remote(
            "getKeywords",
            envelope
                .errortext
                .unwrap_or_else(|| "remote reported failure without error text".to_string()),
        ));
    }
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DokuwebConfig;

    fn test_client() -> DokuwebClient {
        DokuwebClient::new(&DokuwebConfig {
            base_url: "http://dokuweb.invalid".to_string(),
            soap_endpoint: "http://dokuweb.invalid/soap".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
            ticketsystem: None,
        })
    }

    #[test]
    fn create_return_success_is_split() {
        let created = parse_create_ticket_return("true|55|TK-2024-001").unwrap();
        assert_eq!(
            created,
            CreatedTicket {
                ticketid: "55".to_string(),
                ticketnr: "TK-2024-001".to_string(),
            }
        );
    }

    #[test]
    fn create_return_failure_carries_literal_string() {
        let err = parse_create_ticket_return("false|ERR_DUP").unwrap_err();
        assert!(matches!(err, DokuwebError::Remote { .. }));
        assert!(err.to_string().contains("false|ERR_DUP"));
    }

    #[test]
    fn create_return_truncated_is_a_parse_error() {
        let err = parse_create_ticket_return("true|55").unwrap_err();
        assert!(matches!(err, DokuwebError::Parse { .. }));
    }

    #[test]
    fn keywords_success_returns_data_unchanged() {
        let ret = r#"{"SUCCESS": true, "DATA": [{"KEYWORD": "Mieterhöhung", "CATEGORY": "Mietvertrag", "PROCESS": "MV01"}]}"#;
        let keywords = parse_keywords_return(ret).unwrap();
        assert_eq!(keywords.len(), 1);
        assert_eq!(keywords[0].keyword, "Mieterhöhung");
        assert_eq!(keywords[0].category.as_deref(), Some("Mietvertrag"));
        assert_eq!(keywords[0].process.as_deref(), Some("MV01"));
    }

    #[test]
    fn keywords_failure_surfaces_error_text() {
        let ret = r#"{"SUCCESS": false, "ERRORTEXT": "no access"}"#;
        let err = parse_keywords_return(ret).unwrap_err();
        assert!(err.to_string().contains("no access"));
    }

    #[test]
    fn keywords_malformed_json_is_a_parse_error() {
        let err = parse_keywords_return("<html>not json</html>").unwrap_err();
        assert!(matches!(err, DokuwebError::Parse { .. }));
    }

    #[test]
    fn keywords_unknown_fields_are_preserved() {
        let ret = r#"{"SUCCESS": true, "DATA": [{"KEYWORD": "Kündigung", "NEWFIELD": "x"}]}"#;
        let keywords = parse_keywords_return(ret).unwrap();
        assert_eq!(keywords[0].extra["NEWFIELD"], "x");
    }

    #[test]
    fn search_url_keeps_raw_filter_operator() {
        let url = search_tickets_url(
            "http://dokuweb.invalid",
            "tok-1",
            "max@example.com",
            1,
            10,
        );
        assert_eq!(
            url,
            "http://dokuweb.invalid/dokuweb/tickets/?authtoken=tok-1&start=1&max=10\
             &field_count=1&f1=CREATE_BY&f1_op==&f1_val=max%40example.com"
        );
        assert!(url.contains("f1_op=="));
    }

    #[test]
    fn search_url_passes_pagination_through() {
        let url = search_tickets_url("http://dokuweb.invalid", "t", "a", 21, 50);
        assert!(url.contains("start=21&max=50"));
    }

    #[test]
    fn ticket_details_without_element_is_not_found() {
        let err = ticket_details_from_body("55", "<result>kein Treffer</result>").unwrap_err();
        assert!(matches!(err, DokuwebError::Parse { .. }));
        assert!(err.to_string().contains("ticket 55 not found"));
    }

    #[test]
    fn ticket_details_returns_all_attributes() {
        let body = r#"<ticket ticketid="55" status="open" subject="Test"/>"#;
        let attrs = ticket_details_from_body("55", body).unwrap();
        assert_eq!(attrs["ticketid"], "55");
        assert_eq!(attrs["status"], "open");
        assert_eq!(attrs["subject"], "Test");
    }

    #[tokio::test]
    async fn operations_before_authenticate_fail_without_transport() {
        let client = test_client();

        let err = client.get_keywords(None, None).await.unwrap_err();
        assert!(matches!(err, DokuwebError::Precondition(_)));

        let err = client.get_ticket_details("55").await.unwrap_err();
        assert!(matches!(err, DokuwebError::Precondition(_)));

        let err = client
            .search_tickets_by_creator("max@example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DokuwebError::Precondition(_)));

        let req = CreateTicketRequest {
            subject: "Test".to_string(),
            partner: "P-1".to_string(),
            keyword: "Mieterhöhung".to_string(),
            category: None,
            channel: None,
            description: None,
            ticket_type: None,
            plz: None,
            ticketgroup: None,
            fieldvalues: None,
            priority: None,
            ticketsystem: None,
        };
        let err = client.create_ticket(&req).await.unwrap_err();
        assert!(matches!(err, DokuwebError::Precondition(_)));
    }
}
