//! IMAP text rendering for search and fetch requests.

use chrono::NaiveDate;

use super::{FetchSpec, SearchCriteria};

/// Writes a string as an IMAP quoted string, or as an atom when safe.
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    let is_atom = !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\')
        });

    if is_atom {
        buf.extend_from_slice(s.as_bytes());
        return;
    }

    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Writes an IMAP `date` (`d-Mon-yyyy`).
fn write_date(buf: &mut Vec<u8>, date: NaiveDate) {
    buf.extend_from_slice(date.format("%-d-%b-%Y").to_string().as_bytes());
}

/// Writes SEARCH criteria.
pub fn write_search_criteria(buf: &mut Vec<u8>, criteria: &SearchCriteria) {
    match criteria {
        SearchCriteria::All => buf.extend_from_slice(b"ALL"),
        SearchCriteria::Answered => buf.extend_from_slice(b"ANSWERED"),
        SearchCriteria::Deleted => buf.extend_from_slice(b"DELETED"),
        SearchCriteria::Draft => buf.extend_from_slice(b"DRAFT"),
        SearchCriteria::Flagged => buf.extend_from_slice(b"FLAGGED"),
        SearchCriteria::Seen => buf.extend_from_slice(b"SEEN"),
        SearchCriteria::Unseen => buf.extend_from_slice(b"UNSEEN"),
        SearchCriteria::Subject(s) => {
            buf.extend_from_slice(b"SUBJECT ");
            write_astring(buf, s);
        }
        SearchCriteria::From(s) => {
            buf.extend_from_slice(b"FROM ");
            write_astring(buf, s);
        }
        SearchCriteria::Text(s) => {
            buf.extend_from_slice(b"TEXT ");
            write_astring(buf, s);
        }
        SearchCriteria::Since(date) => {
            buf.extend_from_slice(b"SINCE ");
            write_date(buf, *date);
        }
        SearchCriteria::Before(date) => {
            buf.extend_from_slice(b"BEFORE ");
            write_date(buf, *date);
        }
        SearchCriteria::On(date) => {
            buf.extend_from_slice(b"ON ");
            write_date(buf, *date);
        }
        SearchCriteria::ModSeq(modseq) => {
            buf.extend_from_slice(format!("MODSEQ {modseq}").as_bytes());
        }
        SearchCriteria::Or(a, b) => {
            buf.extend_from_slice(b"OR ");
            write_search_criteria(buf, a);
            buf.push(b' ');
            write_search_criteria(buf, b);
        }
        SearchCriteria::Not(c) => {
            buf.extend_from_slice(b"NOT ");
            write_search_criteria(buf, c);
        }
    }
}

/// Writes a full search program: the criteria ANDed by juxtaposition.
///
/// An empty program matches everything and is written as `ALL`.
pub fn write_search_program(buf: &mut Vec<u8>, criteria: &[SearchCriteria]) {
    if criteria.is_empty() {
        buf.extend_from_slice(b"ALL");
        return;
    }
    for (i, c) in criteria.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        write_search_criteria(buf, c);
    }
}

/// Writes the parenthesized FETCH item list for a spec.
pub fn write_fetch_spec(buf: &mut Vec<u8>, spec: &FetchSpec) {
    buf.extend_from_slice(b"(UID FLAGS INTERNALDATE");
    match spec {
        FetchSpec::Headers { fields, structure } => {
            if !fields.is_empty() {
                buf.extend_from_slice(b" BODY.PEEK[HEADER.FIELDS (");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    buf.extend_from_slice(field.to_uppercase().as_bytes());
                }
                buf.extend_from_slice(b")]");
            }
            if *structure {
                buf.extend_from_slice(b" BODYSTRUCTURE");
            }
        }
        FetchSpec::Flags => {}
        FetchSpec::BodyParts(sections) => {
            for section in sections {
                buf.extend_from_slice(b" BODY.PEEK[");
                buf.extend_from_slice(section.as_bytes());
                buf.push(b']');
            }
        }
    }
    buf.push(b')');
}
