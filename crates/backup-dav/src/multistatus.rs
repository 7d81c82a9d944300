//! PROPFIND response parsing.
//!
//! Servers disagree on namespace prefixes (`d:`, `D:`, none), so elements are
//! matched on their local name only.

use crate::{Result, StoreError};
use backup_format::RemoteProps;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One `<response>` element of a multistatus body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavEntry {
    /// `href` as sent by the server.
    pub href: String,
    /// Percent-decoded last path segment of `href`.
    pub name: String,
    /// `resourcetype` contains `collection`.
    pub is_collection: bool,
    /// `getcontentlength`
    pub size: Option<u64>,
    /// `getlastmodified`
    pub modified: Option<DateTime<Utc>>,
}

impl DavEntry {
    /// File properties of this entry.
    pub fn remote_props(&self) -> RemoteProps {
        RemoteProps {
            size_bytes: self.size.unwrap_or(0),
            modified_at: self.modified,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Href,
    ContentLength,
    LastModified,
}

/// Parse a `DAV:multistatus` document.
pub fn parse_multistatus(body: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut in_resourcetype = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut saw_multistatus = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| StoreError::Multistatus(e.to_string()))?;
        match event {
            Event::Start(start) => {
                let name = start.local_name();
                match name.as_ref() {
                    b"multistatus" => saw_multistatus = true,
                    b"response" => current = Some(DavEntry::default()),
                    b"resourcetype" => in_resourcetype = true,
                    b"collection" if in_resourcetype => mark_collection(&mut current),
                    b"href" if current.is_some() => field = Some(Field::Href),
                    b"getcontentlength" => field = Some(Field::ContentLength),
                    b"getlastmodified" => field = Some(Field::LastModified),
                    _ => {}
                }
                text.clear();
            }
            Event::Empty(empty) => {
                let name = empty.local_name();
                match name.as_ref() {
                    b"multistatus" => saw_multistatus = true,
                    b"collection" if in_resourcetype => mark_collection(&mut current),
                    _ => {}
                }
            }
            Event::Text(t) => {
                if field.is_some() {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| StoreError::Multistatus(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(c) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(end) => {
                let name = end.local_name();
                match name.as_ref() {
                    b"response" => {
                        if let Some(entry) = current.take() {
                            if !entry.href.is_empty() {
                                entries.push(entry);
                            }
                        }
                    }
                    b"resourcetype" => in_resourcetype = false,
                    b"href" | b"getcontentlength" | b"getlastmodified" => {
                        if let (Some(f), Some(entry)) = (field.take(), current.as_mut()) {
                            apply_field(entry, f, text.trim());
                        }
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_multistatus {
        return Err(StoreError::Multistatus(
            "missing multistatus element".into(),
        ));
    }
    Ok(entries)
}

fn mark_collection(current: &mut Option<DavEntry>) {
    if let Some(entry) = current.as_mut() {
        entry.is_collection = true;
    }
}

fn apply_field(entry: &mut DavEntry, field: Field, value: &str) {
    match field {
        Field::Href => {
            entry.href = value.to_string();
            entry.name = last_segment(value);
        }
        Field::ContentLength => entry.size = value.parse().ok(),
        Field::LastModified => entry.modified = parse_http_date(value),
    }
}

/// Decoded last non-empty segment of an href (absolute URL or path).
fn last_segment(href: &str) -> String {
    let path = match href.find("://") {
        Some(pos) => {
            let rest = &href[pos + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        None => href,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Parse `getlastmodified`. Servers send RFC 1123; some send RFC 3339.
pub(crate) fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
