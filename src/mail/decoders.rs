use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail, SingleInfo};

use crate::domain::message::{Address, MessageHeader};
use crate::error::{Error, Result};

/// Content subtypes tried for the displayed body, best first.
const BODY_PREFERENCE: [&str; 3] = ["plain", "related", "html"];
const RELATED_ROOT_PREFERENCE: [&str; 2] = ["plain", "html"];

const HTML_WRAP_WIDTH: usize = 78;

fn parse_error(e: impl std::fmt::Display) -> Error {
    Error::Parse(e.to_string())
}

/// Decodes base64 as sent by the proxy; embedded line breaks are tolerated.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::Parse(format!("invalid base64: {e}")))
}

pub fn parse_header(raw: &[u8]) -> Result<MessageHeader> {
    let (headers, _idx) = mailparse::parse_headers(raw).map_err(parse_error)?;

    let date = headers
        .get_first_value("Date")
        .and_then(|d| match mailparse::dateparse(&d) {
            Ok(epoch) => DateTime::<Utc>::from_timestamp(epoch, 0),
            Err(e) => {
                log::debug!("ignoring unparseable date {d:?}: {e}");
                None
            }
        });

    Ok(MessageHeader {
        subject: headers.get_first_value("Subject"),
        from: addresses(&headers, "From"),
        to: addresses(&headers, "To"),
        cc: addresses(&headers, "Cc"),
        date,
    })
}

fn addresses(headers: &[MailHeader], name: &str) -> Vec<Address> {
    let mut out = Vec::new();
    for header in headers.get_all_headers(name) {
        match mailparse::addrparse_header(header) {
            Ok(list) => {
                for addr in list.iter() {
                    match addr {
                        MailAddr::Single(info) => out.push(single(info)),
                        MailAddr::Group(group) => out.extend(group.addrs.iter().map(single)),
                    }
                }
            }
            Err(e) => {
                // keep whatever the header says rather than losing it
                log::debug!("unparseable {name} header: {e}");
                let value = header.get_value();
                let value = value.trim();
                if !value.is_empty() {
                    out.push(Address {
                        name: None,
                        addr: value.to_string(),
                    });
                }
            }
        }
    }
    out
}

fn single(info: &SingleInfo) -> Address {
    Address {
        name: info.display_name.clone().filter(|n| !n.is_empty()),
        addr: info.addr.clone(),
    }
}

pub fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn html_to_text(html: &str) -> Result<String> {
    html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH).map_err(parse_error)
}

/// Full message bytes, validated as MIME when attached.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    raw: Vec<u8>,
}

impl ParsedBody {
    pub fn new(raw: Vec<u8>) -> Result<Self> {
        mailparse::parse_mail(&raw).map_err(parse_error)?;
        Ok(Self { raw })
    }

    pub fn text(&self) -> Result<String> {
        let mail = mailparse::parse_mail(&self.raw).map_err(parse_error)?;
        Ok(normalize_line_endings(&select_body_text(&mail)?))
    }
}

/// plain, related, html first; then the payload of an encrypted container; else nothing.
fn select_body_text(mail: &ParsedMail) -> Result<String> {
    if let Some(part) = find_best_body(mail, &BODY_PREFERENCE) {
        return part_text(part);
    }

    if mimetype(mail) == "multipart/encrypted" {
        if let Some(part) = first_part_of_type(mail, "application/octet-stream") {
            let raw = part.get_body_raw().map_err(parse_error)?;
            return String::from_utf8(raw)
                .map_err(|e| Error::Parse(format!("encrypted payload is not UTF-8: {e}")));
        }
        log::debug!("multipart/encrypted without an application/octet-stream part");
    }

    Ok(String::new())
}

fn mimetype(part: &ParsedMail) -> String {
    part.ctype.mimetype.to_ascii_lowercase()
}

fn is_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

fn find_best_body<'m, 'a>(
    part: &'m ParsedMail<'a>,
    preference: &[&str],
) -> Option<&'m ParsedMail<'a>> {
    let mut found = Vec::new();
    collect_candidates(part, preference, &mut found);
    found
        .into_iter()
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, part)| part)
}

fn collect_candidates<'m, 'a>(
    part: &'m ParsedMail<'a>,
    preference: &[&str],
    found: &mut Vec<(usize, &'m ParsedMail<'a>)>,
) {
    if is_attachment(part) {
        return;
    }
    let mimetype = mimetype(part);
    let Some((main, sub)) = mimetype.split_once('/') else {
        return;
    };
    let rank = |subtype: &str| preference.iter().position(|p| *p == subtype);

    match (main, sub) {
        ("text", _) => {
            if let Some(r) = rank(sub) {
                found.push((r, part));
            }
        }
        ("multipart", "related") => {
            if let Some(r) = rank("related") {
                found.push((r, part));
            }
            if let Some(root) = related_root(part) {
                collect_candidates(root, preference, found);
            }
        }
        ("multipart", _) => {
            for sub in &part.subparts {
                collect_candidates(sub, preference, found);
            }
        }
        _ => {}
    }
}

/// The part named by the `start` parameter, or the first part.
fn related_root<'m, 'a>(part: &'m ParsedMail<'a>) -> Option<&'m ParsedMail<'a>> {
    if let Some(start) = part.ctype.params.get("start") {
        let found = part.subparts.iter().find(|sub| {
            sub.headers
                .get_first_value("Content-ID")
                .is_some_and(|id| id.trim() == start.trim())
        });
        if found.is_some() {
            return found;
        }
    }
    part.subparts.first()
}

fn part_text(part: &ParsedMail) -> Result<String> {
    match mimetype(part).as_str() {
        "multipart/related" => match related_root(part)
            .and_then(|root| find_best_body(root, &RELATED_ROOT_PREFERENCE))
        {
            Some(root) => part_text(root),
            None => Ok(String::new()),
        },
        "text/html" => html_to_text(&part.get_body().map_err(parse_error)?),
        _ => part.get_body().map_err(parse_error),
    }
}

fn first_part_of_type<'m, 'a>(part: &'m ParsedMail<'a>, wanted: &str) -> Option<&'m ParsedMail<'a>> {
    if mimetype(part) == wanted {
        return Some(part);
    }
    part.subparts
        .iter()
        .find_map(|sub| first_part_of_type(sub, wanted))
}
