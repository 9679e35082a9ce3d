use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use xmlrpc::{Request, Transport, Value};

const DEFAULT_USER_AGENT: &str = "confdump/0.1";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Wire sentinel Confluence uses for "no parent" in `getPages` results.
const NO_PARENT: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    /// `None` for top-level pages of the space.
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub title: String,
}

/// Opaque session credential returned by `login`, required by every other call.
#[derive(Debug, Clone)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn test_token(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// The slice of Confluence's XML-RPC v1 surface the exporter needs,
/// one blocking call at a time.
pub trait WikiRpc {
    fn login(&self, user: &str, pass: &str) -> Result<SessionToken>;
    fn get_pages(&self, token: &SessionToken, space: &str) -> Result<Vec<PageSummary>>;
    fn render_content(&self, token: &SessionToken, space: &str, page_id: &str) -> Result<String>;
    fn get_attachments(&self, token: &SessionToken, page_id: &str) -> Result<Vec<Attachment>>;
    fn get_attachment_data(
        &self,
        token: &SessionToken,
        page_id: &str,
        title: &str,
    ) -> Result<Vec<u8>>;
}

pub struct XmlRpcClient {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl XmlRpcClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    fn call(&self, request: Request<'_>) -> Result<Value> {
        let transport = HttpTransport {
            client: &self.client,
            endpoint: &self.endpoint,
            user_agent: &self.user_agent,
        };
        request
            .call(transport)
            .with_context(|| format!("XML-RPC call failed against {}", self.endpoint))
    }
}

impl WikiRpc for XmlRpcClient {
    fn login(&self, user: &str, pass: &str) -> Result<SessionToken> {
        let value = self.call(
            Request::new("confluence1.login")
                .arg(user.to_owned())
                .arg(pass.to_owned()),
        )?;
        let token = value
            .as_str()
            .ok_or_else(|| anyhow!("login response is not a string token"))?;
        Ok(SessionToken(token.to_string()))
    }

    fn get_pages(&self, token: &SessionToken, space: &str) -> Result<Vec<PageSummary>> {
        let value = self.call(
            Request::new("confluence1.getPages")
                .arg(token.as_str().to_owned())
                .arg(space.to_owned()),
        )?;
        let entries = value
            .as_array()
            .ok_or_else(|| anyhow!("getPages response is not an array"))?;
        let mut pages = Vec::with_capacity(entries.len());
        for entry in entries {
            pages.push(decode_page_summary(entry)?);
        }
        Ok(pages)
    }

    fn render_content(&self, token: &SessionToken, space: &str, page_id: &str) -> Result<String> {
        let value = self.call(
            Request::new("confluence1.renderContent")
                .arg(token.as_str().to_owned())
                .arg(space.to_owned())
                .arg(page_id.to_owned())
                .arg(String::new()),
        )?;
        let content = value
            .as_str()
            .ok_or_else(|| anyhow!("renderContent response for page {page_id} is not a string"))?;
        Ok(content.to_string())
    }

    fn get_attachments(&self, token: &SessionToken, page_id: &str) -> Result<Vec<Attachment>> {
        let value = self.call(
            Request::new("confluence1.getAttachments")
                .arg(token.as_str().to_owned())
                .arg(page_id.to_owned()),
        )?;
        let entries = value
            .as_array()
            .ok_or_else(|| anyhow!("getAttachments response for page {page_id} is not an array"))?;
        let mut attachments = Vec::with_capacity(entries.len());
        for entry in entries {
            attachments.push(decode_attachment(entry)?);
        }
        Ok(attachments)
    }

    fn get_attachment_data(
        &self,
        token: &SessionToken,
        page_id: &str,
        title: &str,
    ) -> Result<Vec<u8>> {
        // Version "0" asks for the latest revision of the attachment.
        let value = self.call(
            Request::new("confluence1.getAttachmentData")
                .arg(token.as_str().to_owned())
                .arg(page_id.to_owned())
                .arg(title.to_owned())
                .arg("0".to_owned()),
        )?;
        let data = value.as_bytes().ok_or_else(|| {
            anyhow!("getAttachmentData response for `{title}` on page {page_id} is not base64 data")
        })?;
        Ok(data.to_vec())
    }
}

struct HttpTransport<'a> {
    client: &'a Client,
    endpoint: &'a str,
    user_agent: &'a str,
}

impl Transport for HttpTransport<'_> {
    type Stream = reqwest::blocking::Response;

    fn transmit(
        self,
        request: &Request<'_>,
    ) -> Result<Self::Stream, Box<dyn std::error::Error + Send + Sync>> {
        let mut body = Vec::new();
        request.write_as_xml(&mut body)?;
        let response = self
            .client
            .post(self.endpoint)
            .header("User-Agent", self.user_agent)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {} from XML-RPC endpoint", status.as_u16()).into());
        }
        Ok(response)
    }
}

fn decode_page_summary(value: &Value) -> Result<PageSummary> {
    let fields = value
        .as_struct()
        .ok_or_else(|| anyhow!("page entry is not a struct"))?;
    let id = string_field(fields, "id")?;
    let title = string_field(fields, "title")?;
    let parent = string_field(fields, "parentId")?;
    let parent_id = if parent == NO_PARENT { None } else { Some(parent) };
    Ok(PageSummary {
        id,
        title,
        parent_id,
    })
}

fn decode_attachment(value: &Value) -> Result<Attachment> {
    let fields = value
        .as_struct()
        .ok_or_else(|| anyhow!("attachment entry is not a struct"))?;
    let title = string_field(fields, "title")?;
    Ok(Attachment { title })
}

/// Some Confluence builds serialize ids as `<int>` rather than `<string>`,
/// so numeric fields are coerced to their textual form.
fn string_field(fields: &BTreeMap<String, Value>, name: &str) -> Result<String> {
    let value = fields
        .get(name)
        .ok_or_else(|| anyhow!("missing `{name}` field in RPC struct"))?;
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Int(number) => Ok(number.to_string()),
        Value::Int64(number) => Ok(number.to_string()),
        other => bail!("field `{name}` has unsupported type: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use xmlrpc::Value;

    use super::{decode_attachment, decode_page_summary, string_field};

    fn page_struct(id: Value, title: &str, parent_id: &str) -> Value {
        Value::Struct(BTreeMap::from([
            ("id".to_string(), id),
            ("title".to_string(), Value::String(title.to_string())),
            (
                "parentId".to_string(),
                Value::String(parent_id.to_string()),
            ),
        ]))
    }

    #[test]
    fn page_summary_maps_zero_parent_to_none() {
        let page = decode_page_summary(&page_struct(
            Value::String("1001".to_string()),
            "Home",
            "0",
        ))
        .expect("decode");
        assert_eq!(page.id, "1001");
        assert_eq!(page.title, "Home");
        assert_eq!(page.parent_id, None);
    }

    #[test]
    fn page_summary_keeps_real_parent_id() {
        let page = decode_page_summary(&page_struct(
            Value::String("1002".to_string()),
            "Child",
            "1001",
        ))
        .expect("decode");
        assert_eq!(page.parent_id.as_deref(), Some("1001"));
    }

    #[test]
    fn numeric_ids_are_coerced_to_strings() {
        let page =
            decode_page_summary(&page_struct(Value::Int(7), "Numeric", "0")).expect("decode");
        assert_eq!(page.id, "7");
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let fields = BTreeMap::from([("id".to_string(), Value::String("1".to_string()))]);
        let error = string_field(&fields, "parentId").expect_err("must fail");
        assert!(error.to_string().contains("parentId"));
    }

    #[test]
    fn attachment_decodes_title() {
        let entry = Value::Struct(BTreeMap::from([(
            "title".to_string(),
            Value::String("diagram.png".to_string()),
        )]));
        let attachment = decode_attachment(&entry).expect("decode");
        assert_eq!(attachment.title, "diagram.png");
    }

    #[test]
    fn non_struct_page_entry_fails() {
        let error = decode_page_summary(&Value::String("oops".to_string())).expect_err("must fail");
        assert!(error.to_string().contains("not a struct"));
    }
}
