//! Blocking client for the MediaWiki action API.
//!
//! A [`Wiki`] handle owns one cookie-backed session against one endpoint.
//! It logs in, reads pages and their metadata, submits edits with conflict
//! detection, and lazily enumerates category members, backlinks and
//! transclusions across continuation requests.
//!
//! ```no_run
//! use wikiclient::{Wiki, WikiClientConfig};
//!
//! # fn main() -> wikiclient::Result<()> {
//! let config = WikiClientConfig::new("https://wiki.example.org/w/api.php")
//!     .with_credentials("ExampleBot", "bot-password");
//! let mut wiki = Wiki::connect(config)?;
//!
//! let revision = wiki.read("Sandbox")?;
//! let text = format!("{}\nWorld", revision.content);
//! wiki.edit("Sandbox", &text, "test edit", Some(&revision.timestamp))?;
//!
//! let members = wiki
//!     .category_members("Redirects")
//!     .collect::<wikiclient::Result<Vec<_>>>()?;
//! println!("{} members", members.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod page;
pub mod paginate;
mod response;
pub mod session;
pub mod transport;
pub mod wiki;

#[cfg(test)]
mod testing;

pub use config::{Credentials, TokenKind, WikiClientConfig, WikiConfig, load_config};
pub use error::{Result, WikiError};
pub use page::{EditOutcome, EditRequest, Page, PageInfo, PageList, PageRevision};
pub use paginate::Paginator;
pub use session::{Identity, Session};
pub use transport::{ApiClient, HttpTransport, Method, Params, Transport};
pub use wiki::Wiki;
