//! Request framing and event document parsing.
//!
//! Outgoing requests are SOAP envelopes posted over the already-open event
//! socket (`REUSE_SOCKET`), so the controller pushes events back on the same
//! connection. Incoming events are one XML document per line.

use xmltree::Element;

use crate::error::{Result, StreamError};

/// Prefix every event document starts with
pub const DOCUMENT_START: &str = "<?xml";

/// Method line the controller appends to pushed documents on a reused socket
const REUSE_METHOD_LINE: &str = "POST reuse HTTP/1.1";

const SERVICE_URN: &str = "urn:udi-com:service:X_Insteon_Lighting_Service:1";
const DEVICE_URN: &str = "urn:udi-com:device:X_Insteon_Lighting_Service:1";

/// The three requests the event stream ever sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Fresh subscription, no session id known yet
    Subscribe,
    /// Subscription resuming a session id the controller handed out earlier
    Resubscribe,
    /// Cancel the subscription
    Unsubscribe,
}

impl RequestTemplate {
    /// Pick the subscribe template for the current session.
    pub fn subscribe_for(session_id: Option<&str>) -> Self {
        match session_id {
            Some(_) => RequestTemplate::Resubscribe,
            None => RequestTemplate::Subscribe,
        }
    }

    fn soap_action(&self) -> &'static str {
        match self {
            RequestTemplate::Subscribe | RequestTemplate::Resubscribe => "Subscribe",
            RequestTemplate::Unsubscribe => "Unsubscribe",
        }
    }

    fn body(&self, params: &RequestParams) -> String {
        let sid = escape_xml(params.session_id.as_deref().unwrap_or_default());
        let inner = match self {
            RequestTemplate::Subscribe => {
                "<reportURL>REUSE_SOCKET</reportURL><duration>infinite</duration>".to_string()
            }
            RequestTemplate::Resubscribe => format!(
                "<reportURL>REUSE_SOCKET</reportURL><duration>infinite</duration><SID>{}</SID>",
                sid
            ),
            RequestTemplate::Unsubscribe => format!("<SID>{}</SID>", sid),
        };

        format!(
            "<s:Envelope><s:Body><u:{action} xmlns:u=\"{urn}\">{inner}</u:{action}></s:Body></s:Envelope>\r\n",
            action = self.soap_action(),
            urn = SERVICE_URN,
            inner = inner,
        )
    }
}

/// Connection and session values a request is rendered from.
///
/// Built fresh for every request so the rendered frame always reflects the
/// current session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParams {
    pub address: String,
    pub port: u16,
    /// Base64 `user:password`
    pub auth: String,
    pub session_id: Option<String>,
}

/// Render a request frame: HTTP head followed by the SOAP body.
///
/// `Content-Length` is the byte length of the rendered body.
pub fn build(template: RequestTemplate, params: &RequestParams) -> String {
    let body = template.body(params);
    let head = format!(
        "POST /services HTTP/1.1\r\n\
         Host: {address}:{port}\r\n\
         Authorization: Basic {auth}\r\n\
         Content-Length: {length}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         SOAPAction: {urn}#{action}\r\n\
         \r\n",
        address = params.address,
        port = params.port,
        auth = params.auth,
        length = body.len(),
        urn = DEVICE_URN,
        action = template.soap_action(),
    );

    head + &body
}

/// Strip transport artifacts from a received line.
///
/// Returns `None` for lines that are not event documents (HTTP response
/// headers, blank keep-alive lines, etc.).
pub fn clean_frame(line: &str) -> Option<String> {
    if !line.starts_with(DOCUMENT_START) {
        return None;
    }
    Some(line.trim().replace(REUSE_METHOD_LINE, ""))
}

/// Parse a cleaned frame as an XML document.
pub fn parse(frame: &str) -> Result<Element> {
    Element::parse(frame.as_bytes()).map_err(|e| StreamError::MalformedMessage(e.to_string()))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn params(session_id: Option<&str>) -> RequestParams {
        RequestParams {
            address: "192.168.1.20".to_string(),
            port: 443,
            auth: "YWRtaW46YWRtaW4=".to_string(),
            session_id: session_id.map(str::to_string),
        }
    }

    /// Split a rendered frame into (declared Content-Length, body)
    fn split_frame(frame: &str) -> (usize, &str) {
        let (head, body) = frame.split_once("\r\n\r\n").expect("frame has no header terminator");
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .expect("missing Content-Length")
            .trim()
            .parse()
            .expect("Content-Length is not a number");
        (length, body)
    }

    #[rstest]
    #[case(RequestTemplate::Subscribe, None)]
    #[case(RequestTemplate::Resubscribe, Some("uuid:42"))]
    #[case(RequestTemplate::Unsubscribe, Some("uuid:42"))]
    #[case(RequestTemplate::Unsubscribe, None)]
    fn test_content_length_matches_body(
        #[case] template: RequestTemplate,
        #[case] sid: Option<&str>,
    ) {
        let frame = build(template, &params(sid));
        let (length, body) = split_frame(&frame);
        assert_eq!(length, body.len());
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = build(RequestTemplate::Subscribe, &params(None));

        assert!(frame.starts_with("POST /services HTTP/1.1\r\n"));
        assert!(frame.contains("Host: 192.168.1.20:443\r\n"));
        assert!(frame.contains("Authorization: Basic YWRtaW46YWRtaW4=\r\n"));
        assert!(frame.contains("#Subscribe\r\n"));
        assert!(frame.contains("<reportURL>REUSE_SOCKET</reportURL>"));
        assert!(!frame.contains("<SID>"));
    }

    #[test]
    fn test_resubscribe_frame_carries_session_id() {
        let frame = build(RequestTemplate::Resubscribe, &params(Some("uuid:77")));
        assert!(frame.contains("<SID>uuid:77</SID>"));
        assert!(frame.contains("<duration>infinite</duration>"));
    }

    #[test]
    fn test_unsubscribe_frame() {
        let frame = build(RequestTemplate::Unsubscribe, &params(Some("uuid:77")));
        assert!(frame.contains("#Unsubscribe\r\n"));
        assert!(frame.contains("<u:Unsubscribe "));
        assert!(frame.contains("<SID>uuid:77</SID>"));
        assert!(!frame.contains("REUSE_SOCKET"));
    }

    #[test]
    fn test_subscribe_for_picks_template() {
        assert_eq!(RequestTemplate::subscribe_for(None), RequestTemplate::Subscribe);
        assert_eq!(
            RequestTemplate::subscribe_for(Some("uuid:1")),
            RequestTemplate::Resubscribe
        );
    }

    #[test]
    fn test_session_id_is_escaped() {
        let frame = build(RequestTemplate::Resubscribe, &params(Some("a<b&c")));
        assert!(frame.contains("<SID>a&lt;b&amp;c</SID>"));
        let (length, body) = split_frame(&frame);
        assert_eq!(length, body.len());
    }

    #[test]
    fn test_clean_frame_strips_reuse_method_line() {
        let line = "<?xml version=\"1.0\"?><Event seqnum=\"1\"></Event>POST reuse HTTP/1.1\r";
        assert_eq!(
            clean_frame(line).as_deref(),
            Some("<?xml version=\"1.0\"?><Event seqnum=\"1\"></Event>")
        );
    }

    #[test]
    fn test_clean_frame_skips_non_documents() {
        assert!(clean_frame("HTTP/1.1 200 OK\r").is_none());
        assert!(clean_frame("Content-Length: 42\r").is_none());
        assert!(clean_frame("").is_none());
        assert!(clean_frame("  <?xml version=\"1.0\"?>").is_none());
    }

    #[test]
    fn test_parse_valid_document() {
        let doc = parse("<?xml version=\"1.0\"?><Event sid=\"uuid:9\"><control>_0</control></Event>")
            .unwrap();
        assert_eq!(doc.name, "Event");
        assert_eq!(doc.attributes.get("sid").map(String::as_str), Some("uuid:9"));
    }

    #[test]
    fn test_parse_malformed_document() {
        let result = parse("<?xml version=\"1.0\"?><Event><control>_0</Event>");
        assert!(matches!(result, Err(StreamError::MalformedMessage(_))));
    }

    proptest! {
        #[test]
        fn prop_content_length_matches_body(
            address in "[a-z0-9.]{1,30}",
            port in 1u16..,
            auth in "[A-Za-z0-9+/=]{0,64}",
            sid in proptest::option::of("[ -~]{0,40}"),
            template in prop_oneof![
                Just(RequestTemplate::Subscribe),
                Just(RequestTemplate::Resubscribe),
                Just(RequestTemplate::Unsubscribe),
            ],
        ) {
            let params = RequestParams { address, port, auth, session_id: sid };
            let frame = build(template, &params);
            let (length, body) = split_frame(&frame);
            prop_assert_eq!(length, body.len());
        }
    }
}
