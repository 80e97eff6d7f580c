//! Minimal XML-RPC codec and HTTP transport for the build service.
//!
//! Only what the hub API needs: positional parameters, the `nil` extension,
//! 64-bit integers (`i8`), and fault decoding. No multicall, no auth.

use std::collections::BTreeMap;

use kbot_shared::{KbotError, Result};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};
use url::Url;

/// User-Agent string for hub requests.
const USER_AGENT: &str = concat!("kbot/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    /// Raw `dateTime.iso8601` text; callers pick the format they expect.
    DateTime(String),
    /// Raw base64 text, not decoded.
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a struct member. Returns `None` for non-structs.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Struct(members) => members.get(key),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize a `<methodCall>` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(param, &mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

fn encode_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(i) if i32::try_from(*i).is_ok() => out.push_str(&format!("<int>{i}</int>")),
        Value::Int(i) => out.push_str(&format!("<i8>{i}</i8>")),
        Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => out.push_str(&format!("<double>{d}</double>")),
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(s) => {
            out.push_str("<base64>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Element tree used while decoding. Attributes are irrelevant to XML-RPC.
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn new(start: &BytesStart<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> Result<&Node> {
        self.child(name).ok_or_else(|| {
            KbotError::parse(format!("<{}> is missing a <{name}> element", self.name))
        })
    }
}

/// Parse a `<methodResponse>` document into its single return value.
///
/// A `<fault>` response becomes [`KbotError::Rpc`].
pub fn decode_response(body: &str) -> Result<Value> {
    let root = parse_tree(body)?;
    if root.name != "methodResponse" {
        return Err(KbotError::parse(format!(
            "expected <methodResponse>, found <{}>",
            root.name
        )));
    }

    if let Some(fault) = root.child("fault") {
        let value = value_from_node(fault.require("value")?)?;
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or_default();
        let message = value
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or("unknown fault")
            .to_string();
        return Err(KbotError::Rpc { code, message });
    }

    let params = root.require("params")?;
    match params.child("param") {
        Some(param) => value_from_node(param.require("value")?),
        None => Ok(Value::Nil),
    }
}

fn parse_tree(body: &str) -> Result<Node> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| KbotError::parse(format!("invalid XML-RPC document: {e}")))?;
        match event {
            Event::Start(start) => stack.push(Node::new(&start)),
            Event::Empty(start) => attach(&mut stack, &mut root, Node::new(&start)),
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| KbotError::parse("unbalanced XML-RPC document"))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| KbotError::parse(format!("bad text in XML-RPC: {e}")))?;
                    top.text.push_str(&unescaped);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(KbotError::parse("truncated XML-RPC document"));
    }
    root.ok_or_else(|| KbotError::parse("empty XML-RPC document"))
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

/// Decode a `<value>` element.
fn value_from_node(node: &Node) -> Result<Value> {
    // Untyped content is a string.
    let Some(typed) = node.children.first() else {
        return Ok(Value::String(node.text.clone()));
    };

    let text = typed.text.trim();
    match typed.name.as_str() {
        "int" | "i4" | "i8" => text
            .parse()
            .map(Value::Int)
            .map_err(|e| KbotError::parse(format!("bad integer {text:?}: {e}"))),
        "boolean" => match text {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            other => Err(KbotError::parse(format!("bad boolean {other:?}"))),
        },
        "string" => Ok(Value::String(typed.text.clone())),
        "double" => text
            .parse()
            .map(Value::Double)
            .map_err(|e| KbotError::parse(format!("bad double {text:?}: {e}"))),
        "dateTime.iso8601" => Ok(Value::DateTime(text.to_string())),
        "base64" => Ok(Value::Base64(text.to_string())),
        "nil" => Ok(Value::Nil),
        "array" => typed
            .require("data")?
            .children
            .iter()
            .filter(|c| c.name == "value")
            .map(value_from_node)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member.require("name")?.text.clone();
                let value = value_from_node(member.require("value")?)?;
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        other => Err(KbotError::parse(format!("unsupported XML-RPC type <{other}>"))),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// XML-RPC client bound to one hub endpoint.
///
/// Idle connections are never kept, so every call opens a fresh connection.
#[derive(Debug, Clone)]
pub struct RpcClient {
    endpoint: Url,
    client: Client,
}

impl RpcClient {
    /// Create a client for the given hub URL.
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| KbotError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Invoke `method` with positional `params` and decode the reply.
    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        let body = encode_call(method, params);
        debug!(method, endpoint = %self.endpoint, "calling hub");
        trace!(%body, "request body");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| KbotError::Network(format!("{method}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KbotError::Network(format!("{method}: HTTP {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| KbotError::Network(format!("{method}: failed to read body: {e}")))?;
        trace!(%text, "response body");

        decode_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_changelog_call() {
        let xml = encode_call(
            "getChangelogEntries",
            &[
                "kernel-3.10.0-825.el7".into(),
                "".into(),
                Value::Int(42),
                Value::Int(5_000_000_000),
                Value::Nil,
            ],
        );
        assert!(xml.contains("<methodName>getChangelogEntries</methodName>"));
        assert!(xml.contains("<value><string>kernel-3.10.0-825.el7</string></value>"));
        assert!(xml.contains("<value><string></string></value>"));
        assert!(xml.contains("<value><int>42</int></value>"));
        assert!(xml.contains("<value><i8>5000000000</i8></value>"));
        assert!(xml.contains("<value><nil/></value>"));
    }

    #[test]
    fn encode_escapes_text() {
        let xml = encode_call("echo", &["a<b & c".into()]);
        assert!(xml.contains("<string>a&lt;b &amp; c</string>"));
    }

    #[test]
    fn decode_struct_response() {
        let body = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><struct>
<member><name>nvr</name><value><string>kernel-3.10.0-825.el7</string></value></member>
<member><name>task_id</name><value><int>14744635</int></value></member>
<member><name>extra</name><value><nil/></value></member>
<member><name>volume_name</name><value>DEFAULT</value></member>
<member><name>completion_ts</name><value><double>1513166035.82477</double></value></member>
</struct></value>
</param>
</params>
</methodResponse>"#;
        let value = decode_response(body).unwrap();
        assert_eq!(value.get("nvr").and_then(Value::as_str), Some("kernel-3.10.0-825.el7"));
        assert_eq!(value.get("task_id").and_then(Value::as_i64), Some(14744635));
        assert!(value.get("extra").is_some_and(Value::is_nil));
        assert_eq!(value.get("volume_name").and_then(Value::as_str), Some("DEFAULT"));
        assert_eq!(value.get("completion_ts"), Some(&Value::Double(1513166035.82477)));
    }

    #[test]
    fn decode_array_with_namespaced_nil() {
        let body = r#"<methodResponse xmlns:ex="http://ws.apache.org/xmlrpc/namespaces/extensions">
<params><param><value><array><data>
<value><i8>1</i8></value>
<value><boolean>1</boolean></value>
<value><ex:nil/></value>
<value><string>a &amp; b</string></value>
</data></array></value></param></params></methodResponse>"#;
        let value = decode_response(body).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Value::Int(1));
        assert_eq!(items[1], Value::Bool(true));
        assert_eq!(items[2], Value::Nil);
        assert_eq!(items[3], Value::String("a & b".into()));
    }

    #[test]
    fn decode_fault() {
        let body = r#"<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>1000</int></value></member>
<member><name>faultString</name><value><string>No such build: kernel-0</string></value></member>
</struct></value></fault></methodResponse>"#;
        match decode_response(body) {
            Err(KbotError::Rpc { code, message }) => {
                assert_eq!(code, 1000);
                assert_eq!(message, "No such build: kernel-0");
            }
            other => panic!("expected Rpc fault, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_response("<html><body>502</body></html>").is_err());
        assert!(decode_response("<methodResponse><params>").is_err());
        assert!(decode_response("").is_err());
    }

    #[tokio::test]
    async fn call_posts_xml_and_decodes() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::header("content-type", "text/xml"))
            .and(wiremock::matchers::body_string_contains(
                "<methodName>getTaskChildren</methodName>",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(
                "<methodResponse><params><param><value><array><data>\
                 </data></array></value></param></params></methodResponse>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcClient::new(Url::parse(&server.uri()).unwrap()).unwrap();
        let value = client.call("getTaskChildren", &[Value::Int(1)]).await.unwrap();
        assert_eq!(value, Value::Array(vec![]));
    }

    #[tokio::test]
    async fn call_maps_http_errors() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RpcClient::new(Url::parse(&server.uri()).unwrap()).unwrap();
        let err = client.call("getBuild", &["kernel".into()]).await.unwrap_err();
        assert!(matches!(err, KbotError::Network(ref m) if m.contains("503")));
    }
}
