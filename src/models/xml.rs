use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Attribute-pair extractor for the dokuweb XML read endpoints.
///
/// The service returns flat documents whose payload is a series of
/// self-closing `<ticket ... />` elements with inline `key="value"`
/// attributes. This is deliberately not a general XML parser: nested
/// elements, CDATA and entity decoding are not handled, because the
/// service never emits them. Attribute values may contain anything
/// except an unescaped double quote.

fn ticket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Attributes are matched as explicit quoted pairs so values may
    // contain '>' or '/' without ending the element early.
    RE.get_or_init(|| Regex::new(r#"<ticket((?:\s+[\w:.-]+\s*=\s*"[^"]*")*)\s*/>"#).unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w:.-]+)\s*=\s*"([^"]*)""#).unwrap())
}

pub type TicketAttrs = BTreeMap<String, String>;

/// All `<ticket .../>` elements in `body`, in document order. An input
/// without any matching element yields an empty Vec.
pub fn extract_tickets(body: &str) -> Vec<TicketAttrs> {
    ticket_re()
        .captures_iter(body)
        .map(|caps| {
            attr_re()
                .captures_iter(&caps[1])
                .map(|attr| (attr[1].to_string(), attr[2].to_string()))
                .collect()
        })
        .collect()
}

/// The first `<ticket .../>` element in `body`, or `None` if the body
/// contains no such element.
pub fn extract_ticket(body: &str) -> Option<TicketAttrs> {
    extract_tickets(body).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_elements_yields_empty() {
        assert!(extract_tickets("<tickets></tickets>").is_empty());
        assert!(extract_ticket("<result>nothing here</result>").is_none());
    }

    #[test]
    fn single_element() {
        let body = r#"<ticket ticketid="55" ticketnr="TK-2024-001" status="open"/>"#;
        let attrs = extract_ticket(body).unwrap();
        assert_eq!(attrs.get("ticketid").unwrap(), "55");
        assert_eq!(attrs.get("ticketnr").unwrap(), "TK-2024-001");
        assert_eq!(attrs.get("status").unwrap(), "open");
        assert_eq!(attrs.len(), 3);
    }

    #[test]
    fn many_elements_in_document_order() {
        let body = concat!(
            r#"<tickets total="3">"#,
            r#"<ticket ticketid="1"/>"#,
            "\n  ",
            r#"<ticket ticketid="2" />"#,
            r#"<ticket ticketid="3"/>"#,
            "</tickets>"
        );
        let all = extract_tickets(body);
        assert_eq!(all.len(), 3);
        let ids: Vec<_> = all.iter().map(|t| t["ticketid"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn values_keep_special_characters() {
        let body = r#"<ticket subject="Mieterhöhung <dringend> & Co." create_by="max@example.com"/>"#;
        let attrs = extract_ticket(body).unwrap();
        assert_eq!(attrs["subject"], "Mieterhöhung <dringend> & Co.");
        assert_eq!(attrs["create_by"], "max@example.com");
    }

    #[test]
    fn ignores_other_elements() {
        let body = r#"<tickets><notaticket id="9"/><ticket ticketid="7"/></tickets>"#;
        let all = extract_tickets(body);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["ticketid"], "7");
    }
}
