use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, WikiError};
use crate::paginate::Paginator;
use crate::response::{array_or_map, decode, flag};
use crate::transport::{Params, Transport, params};
use crate::wiki::Wiki;

/// Namespace of `Category:` pages.
pub const NS_CATEGORY: i32 = 14;

const CATEGORY_PREFIX: &str = "Category:";

/// A page handle. Holds no content; every read goes back to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Page {
    pub title: String,
    #[serde(default, rename = "ns")]
    pub namespace: Option<i32>,
    #[serde(default, rename = "pageid")]
    pub page_id: Option<i64>,
}

impl Page {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            namespace: None,
            page_id: None,
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Current wikitext of a page plus the timestamp to pass back as the edit base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRevision {
    pub title: String,
    pub content: String,
    pub timestamp: String,
    pub revision_id: Option<i64>,
}

/// `prop=info` snapshot. A missing page is reported through `missing`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageInfo {
    pub title: String,
    #[serde(rename = "ns")]
    pub namespace: i32,
    #[serde(default, rename = "pageid")]
    pub page_id: Option<i64>,
    #[serde(default, deserialize_with = "flag")]
    pub missing: bool,
    #[serde(default, rename = "contentmodel")]
    pub content_model: Option<String>,
    #[serde(default)]
    pub touched: Option<String>,
    #[serde(default, rename = "lastrevid")]
    pub last_revision_id: Option<i64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default, deserialize_with = "flag")]
    pub redirect: bool,
    /// Remaining properties, including any requested through `inprop`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PageInfo {
    pub fn exists(&self) -> bool {
        !self.missing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    /// Timestamp of the revision the new text was based on; enables conflict detection.
    pub base_timestamp: Option<String>,
    pub minor: bool,
    pub bot: bool,
}

impl EditRequest {
    pub fn new(title: impl Into<String>, text: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn based_on(mut self, timestamp: impl Into<String>) -> Self {
        self.base_timestamp = Some(timestamp.into());
        self
    }

    pub fn minor(mut self) -> Self {
        self.minor = true;
        self
    }

    pub fn bot(mut self) -> Self {
        self.bot = true;
        self
    }

    fn to_params(&self, token: &str) -> Params {
        let mut request = params([
            ("action", "edit"),
            ("title", self.title.as_str()),
            ("text", self.text.as_str()),
            ("summary", self.summary.as_str()),
        ]);
        if let Some(timestamp) = &self.base_timestamp {
            request.insert("basetimestamp".to_string(), timestamp.clone());
        }
        if self.minor {
            request.insert("minor".to_string(), "1".to_string());
        }
        if self.bot {
            request.insert("bot".to_string(), "1".to_string());
        }
        request.insert("token".to_string(), token.to_string());
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub title: String,
    pub page_id: Option<i64>,
    pub old_revision_id: Option<i64>,
    pub new_revision_id: Option<i64>,
    pub new_timestamp: Option<String>,
    /// The submitted text matched the current revision; nothing was saved.
    pub no_change: bool,
    pub created: bool,
}

/// Pages produced by one of the related-page enumerations.
pub struct PageList<'a, T> {
    inner: Paginator<'a, T, Page>,
    exclude: Option<String>,
}

impl<T: Transport> PageList<'_, T> {
    pub fn requests(&self) -> usize {
        self.inner.requests()
    }
}

impl<T: Transport> Iterator for PageList<'_, T> {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            let excluded = matches!(
                (&item, &self.exclude),
                (Ok(page), Some(title))
                    if page.namespace.is_none_or(|ns| ns == NS_CATEGORY)
                        && canonical_title(&page.title) == *title
            );
            if !excluded {
                return Some(item);
            }
        }
    }
}

impl<T: Transport> Wiki<T> {
    /// Current wikitext and revision timestamp of `title`.
    pub fn read(&mut self, title: &str) -> Result<PageRevision> {
        let response = self.api.get(&params([
            ("action", "query"),
            ("prop", "revisions"),
            ("titles", title),
            ("rvprop", "content|timestamp|ids"),
            ("rvslots", "main"),
        ]))?;
        let page: RevisionPage = decode(first_page(response)?, "page content")?;
        if page.missing {
            return Err(WikiError::PageNotFound {
                title: page.title.unwrap_or_else(|| title.to_string()),
            });
        }

        let page_title = page.title.unwrap_or_else(|| title.to_string());
        let revision = page.revisions.into_iter().next().ok_or_else(|| {
            WikiError::protocol(format!("no revision returned for {page_title}"))
        })?;
        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .and_then(|slot| slot.content.or(slot.legacy_content))
            .or(revision.content)
            .or(revision.legacy_content)
            .ok_or_else(|| WikiError::protocol(format!("revision content missing for {page_title}")))?;
        let timestamp = revision.timestamp.ok_or_else(|| {
            WikiError::protocol(format!("revision timestamp missing for {page_title}"))
        })?;

        Ok(PageRevision {
            title: page_title,
            content,
            timestamp,
            revision_id: revision.revid,
        })
    }

    pub fn query_info(&mut self, title: &str) -> Result<PageInfo> {
        self.query_info_with(title, &[])
    }

    /// Like [`Wiki::query_info`], additionally requesting the given `inprop` values.
    pub fn query_info_with(&mut self, title: &str, properties: &[&str]) -> Result<PageInfo> {
        let mut request = params([("action", "query"), ("prop", "info"), ("titles", title)]);
        if !properties.is_empty() {
            request.insert("inprop".to_string(), properties.join("|"));
        }
        let response = self.api.get(&request)?;
        decode(first_page(response)?, "page info")
    }

    /// Create or replace the text of `title`.
    ///
    /// With `base_timestamp` set, the server refuses the write if another
    /// revision landed after it, reported as [`WikiError::EditConflict`].
    pub fn edit(
        &mut self,
        title: &str,
        text: &str,
        summary: &str,
        base_timestamp: Option<&str>,
    ) -> Result<EditOutcome> {
        let mut request = EditRequest::new(title, text, summary);
        if let Some(timestamp) = base_timestamp {
            request = request.based_on(timestamp);
        }
        self.submit_edit(&request)
    }

    /// Submit an edit, refreshing a rejected token and retrying exactly once.
    pub fn submit_edit(&mut self, request: &EditRequest) -> Result<EditOutcome> {
        let mut refreshed = false;
        loop {
            let token = self.edit_token()?;
            match self.post_edit(request, &token) {
                Ok(outcome) => return Ok(outcome),
                Err(error) if error.is_bad_token() => {
                    self.invalidate_edit_token();
                    if refreshed {
                        return Err(classify_edit_error(&request.title, error));
                    }
                    warn!(title = %request.title, "edit token rejected; refreshing and retrying");
                    refreshed = true;
                }
                Err(error) => return Err(classify_edit_error(&request.title, error)),
            }
        }
    }

    fn post_edit(&mut self, request: &EditRequest, token: &str) -> Result<EditOutcome> {
        let response = self.api.post(&request.to_params(token))?;
        let payload: EditResponse = decode(response, "edit")?;
        let edit = payload
            .edit
            .ok_or_else(|| WikiError::protocol("missing edit payload in API response"))?;

        if edit.result.as_deref() != Some("Success") {
            let code = edit.result.unwrap_or_else(|| "unknown".to_string());
            let info = edit
                .info
                .or(edit.warning)
                .unwrap_or_else(|| "edit was not saved".to_string());
            return Err(WikiError::Edit {
                title: request.title.clone(),
                code,
                info,
            });
        }

        let outcome = EditOutcome {
            title: edit.title.unwrap_or_else(|| request.title.clone()),
            page_id: edit.pageid,
            old_revision_id: edit.oldrevid,
            new_revision_id: edit.newrevid,
            new_timestamp: edit.newtimestamp,
            no_change: edit.nochange,
            created: edit.new,
        };
        info!(
            title = %outcome.title,
            revision = outcome.new_revision_id.unwrap_or_default(),
            no_change = outcome.no_change,
            "saved MediaWiki edit"
        );
        Ok(outcome)
    }

    /// Members of a category, in server order. `Category:` is prepended when absent.
    pub fn category_members(&mut self, category: &str) -> PageList<'_, T> {
        let category_title = category_title(category);
        let request = params([
            ("action", "query"),
            ("list", "categorymembers"),
            ("cmtitle", category_title.as_str()),
            ("cmlimit", "max"),
        ]);
        let exclude = canonical_title(&category_title);
        PageList {
            inner: self.query_list(request, "categorymembers"),
            exclude: Some(exclude),
        }
    }

    /// Pages linking to `title` ("what links here").
    pub fn backlinks(&mut self, title: &str) -> PageList<'_, T> {
        let request = params([
            ("action", "query"),
            ("list", "backlinks"),
            ("bltitle", title),
            ("bllimit", "max"),
        ]);
        PageList {
            inner: self.query_list(request, "backlinks"),
            exclude: None,
        }
    }

    /// Pages transcluding `title` ("what transcludes this").
    pub fn transclusions(&mut self, title: &str) -> PageList<'_, T> {
        let request = params([
            ("action", "query"),
            ("list", "embeddedin"),
            ("eititle", title),
            ("eilimit", "max"),
        ]);
        PageList {
            inner: self.query_list(request, "embeddedin"),
            exclude: None,
        }
    }
}

/// `Category:` plus the category name, with underscores read as spaces.
///
/// Namespace names are case-insensitive, so `category:X` is rewritten to `Category:X`.
fn category_title(category: &str) -> String {
    let spaced = category.replace('_', " ");
    let trimmed = spaced.trim();
    let name = match trimmed.get(..CATEGORY_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(CATEGORY_PREFIX) => {
            trimmed[CATEGORY_PREFIX.len()..].trim_start()
        }
        _ => trimmed,
    };
    format!("{CATEGORY_PREFIX}{name}")
}

/// Title in the form the server reports it: single spaces, first letter of
/// the page name upper-cased.
fn canonical_title(title: &str) -> String {
    let spaced = title.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let (namespace, name) = match collapsed.split_once(':') {
        Some((namespace, name)) => (Some(namespace.trim_end()), name.trim_start()),
        None => (None, collapsed.as_str()),
    };
    let mut chars = name.chars();
    let name: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    match namespace {
        Some(namespace) => format!("{namespace}:{name}"),
        None => name,
    }
}

/// Map API rejections of an edit onto the edit taxonomy; other failures pass through.
fn classify_edit_error(title: &str, error: WikiError) -> WikiError {
    match error {
        WikiError::Api { code, info } if code == "editconflict" => WikiError::EditConflict {
            title: title.to_string(),
            info,
        },
        WikiError::Api { code, info } => WikiError::Edit {
            title: title.to_string(),
            code,
            info,
        },
        other => other,
    }
}

/// The single page object of a one-title query, checked for an invalid title.
fn first_page(response: Value) -> Result<Value> {
    let payload: PagesResponse = decode(response, "page query")?;
    let page = payload
        .query
        .and_then(|query| query.pages.into_iter().next())
        .ok_or_else(|| WikiError::protocol("query returned no page object"))?;
    if page.get("invalid").is_some() {
        let info = page
            .get("invalidreason")
            .and_then(Value::as_str)
            .unwrap_or("invalid title")
            .to_string();
        return Err(WikiError::Api {
            code: "invalidtitle".to_string(),
            info,
        });
    }
    Ok(page)
}

#[derive(Debug, Deserialize, Default)]
struct PagesResponse {
    query: Option<PagesPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct PagesPayload {
    #[serde(default, deserialize_with = "array_or_map")]
    pages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RevisionPage {
    title: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    revid: Option<i64>,
    timestamp: Option<String>,
    slots: Option<RevisionSlots>,
    content: Option<String>,
    #[serde(rename = "*")]
    legacy_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
    #[serde(rename = "*")]
    legacy_content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    title: Option<String>,
    pageid: Option<i64>,
    oldrevid: Option<i64>,
    newrevid: Option<i64>,
    newtimestamp: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    nochange: bool,
    #[serde(default, deserialize_with = "flag")]
    new: bool,
    info: Option<String>,
    warning: Option<String>,
}
