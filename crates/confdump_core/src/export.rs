use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::rpc::{PageSummary, SessionToken, WikiRpc};

/// How rendered page content is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Drop every non-ASCII character before writing. Lossy, and the
    /// historical default of this exporter.
    AsciiLossy,
    /// Write the rendered content unchanged.
    Utf8,
}

/// One exported page as the hierarchy builder sees it: files are already on
/// disk under `folder` at the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedPage {
    pub page_id: String,
    pub folder: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageExport {
    pub record: ExportedPage,
    pub attachment_count: usize,
}

/// Strip characters that are illegal or ambiguous as path components.
/// Two titles may sanitize to the same name; collisions are not renamed.
pub fn sanitize_title(title: &str) -> String {
    title.chars().filter(|ch| !matches!(ch, ':' | '/')).collect()
}

pub fn encode_content(content: &str, encoding: ContentEncoding) -> Cow<'_, str> {
    match encoding {
        ContentEncoding::Utf8 => Cow::Borrowed(content),
        ContentEncoding::AsciiLossy => {
            if content.is_ascii() {
                Cow::Borrowed(content)
            } else {
                Cow::Owned(content.chars().filter(char::is_ascii).collect())
            }
        }
    }
}

/// Export one page into `out_dir/<folder>/`: the rendered HTML as
/// `<folder>.html` plus one file per attachment. Reruns overwrite files
/// rather than failing. Any RPC error propagates and aborts the run.
pub fn export_page(
    rpc: &dyn WikiRpc,
    token: &SessionToken,
    space: &str,
    page: &PageSummary,
    out_dir: &Path,
    encoding: ContentEncoding,
) -> Result<PageExport> {
    let folder = sanitize_title(&page.title);
    if folder.is_empty() {
        bail!("page {} title {:?} sanitizes to an empty folder name", page.id, page.title);
    }
    let page_dir = out_dir.join(&folder);
    fs::create_dir_all(&page_dir)
        .with_context(|| format!("failed to create {}", page_dir.display()))?;

    let content = rpc.render_content(token, space, &page.id)?;
    let html_path = page_dir.join(format!("{folder}.html"));
    fs::write(&html_path, encode_content(&content, encoding).as_bytes())
        .with_context(|| format!("failed to write {}", html_path.display()))?;

    let attachments = rpc.get_attachments(token, &page.id)?;
    let attachment_count = attachments.len();
    for attachment in &attachments {
        let data = rpc.get_attachment_data(token, &page.id, &attachment.title)?;
        let file_path = page_dir.join(sanitize_title(&attachment.title));
        fs::write(&file_path, &data)
            .with_context(|| format!("failed to write {}", file_path.display()))?;
    }

    Ok(PageExport {
        record: ExportedPage {
            page_id: page.id.clone(),
            folder,
            parent_id: page.parent_id.clone(),
        },
        attachment_count,
    })
}
