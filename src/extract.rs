//! JATS/NXML field extraction.
//!
//! Pulls the fields the pipeline needs out of one full-text article: title, journal,
//! author list, PMID, and the acknowledgement, abstract and body text. Extraction is
//! best-effort. A field that cannot be found is `None` (or an empty author list), and a
//! document that breaks the XML reader part-way through still yields whatever was
//! captured before the break.
//!
//! # Example
//!
//! ```
//! use grantlink::{FieldExtractor, JatsExtractor};
//!
//! let input = r#"<article><front>
//! <journal-meta><journal-title>Cancer Research</journal-title></journal-meta>
//! <article-meta>
//!   <article-id pub-id-type="pmid">12345</article-id>
//!   <title-group><article-title>Example Title</article-title></title-group>
//!   <contrib-group><contrib><name><surname>Smith</surname><given-names>John</given-names></name></contrib></contrib-group>
//! </article-meta></front>
//! <body><p>Body text.</p></body></article>"#;
//!
//! let fields = JatsExtractor::new().extract(input).unwrap();
//! assert_eq!(fields.title.as_deref(), Some("Example Title"));
//! assert_eq!(fields.authors, vec!["Smith, John"]);
//! assert_eq!(fields.pmid.as_deref(), Some("12345"));
//! ```

pub mod funding;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::utils::{collapse_whitespace, unescape_text};
use crate::{GrantError, Result};

/// Structured fields of one article. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub journal: Option<String>,
    /// `Surname, Given names` per author of the first contributor group
    pub authors: Vec<String>,
    /// Grant number found in the acknowledgement or abstract
    pub grant_number: Option<String>,
    pub pmid: Option<String>,
    pub ack_text: Option<String>,
    pub abstract_text: Option<String>,
    pub body_text: Option<String>,
}

impl ExtractedFields {
    /// Acknowledgement and abstract joined by a space, the text searched for funding.
    pub fn funding_text(&self) -> Option<String> {
        match (&self.ack_text, &self.abstract_text) {
            (Some(ack), Some(abs)) => Some(format!("{ack} {abs}")),
            (Some(text), None) | (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.journal.is_none()
            && self.authors.is_empty()
            && self.pmid.is_none()
            && self.ack_text.is_none()
            && self.abstract_text.is_none()
            && self.body_text.is_none()
    }
}

/// Trait for turning one raw document into [`ExtractedFields`].
pub trait FieldExtractor: Send + Sync {
    /// Extracts fields from raw document text.
    ///
    /// # Errors
    ///
    /// Returns an error only when nothing at all could be read from the document.
    fn extract(&self, input: &str) -> Result<ExtractedFields>;
}

/// Extractor for PMC-style JATS (`.nxml`) articles.
#[derive(Debug, Default, Clone)]
pub struct JatsExtractor {}

impl JatsExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Journal,
    Title,
    Pmid,
    Abstract,
    Ack,
    Body,
}

impl Section {
    fn index(self) -> usize {
        self as usize
    }

    fn for_element(element: &BytesStart<'_>) -> Option<Section> {
        match element.local_name().as_ref() {
            b"journal-title" => Some(Section::Journal),
            b"title-group" => Some(Section::Title),
            b"abstract" => Some(Section::Abstract),
            b"ack" => Some(Section::Ack),
            b"body" => Some(Section::Body),
            b"article-id" if has_attribute(element, b"pub-id-type", b"pmid") => {
                Some(Section::Pmid)
            }
            _ => None,
        }
    }
}

fn has_attribute(element: &BytesStart<'_>, key: &[u8], value: &[u8]) -> bool {
    element
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == key && attr.value.as_ref() == value)
}

/// Collects text for the first occurrence of each [`Section`].
#[derive(Debug, Default)]
struct SectionCapture {
    buffers: [String; 6],
    /// Depth at which each open section started
    open: [Option<usize>; 6],
    done: [bool; 6],
}

impl SectionCapture {
    fn start(&mut self, section: Section, depth: usize) {
        let i = section.index();
        if !self.done[i] && self.open[i].is_none() {
            self.open[i] = Some(depth);
        }
    }

    fn end(&mut self, depth: usize) {
        for i in 0..self.open.len() {
            if self.open[i] == Some(depth) {
                self.open[i] = None;
                self.done[i] = true;
            }
        }
    }

    fn push(&mut self, text: &str) {
        for i in 0..self.open.len() {
            if self.open[i].is_some() {
                self.buffers[i].push_str(text);
            }
        }
    }

    fn take(&mut self, section: Section) -> Option<String> {
        let text = collapse_whitespace(&self.buffers[section.index()]);
        (!text.is_empty()).then_some(text)
    }
}

/// Author names of the first `<contrib-group>`.
#[derive(Debug, Default)]
struct AuthorCapture {
    group_depth: Option<usize>,
    group_done: bool,
    in_name: bool,
    field: Option<NamePart>,
    surname: String,
    given: String,
    authors: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum NamePart {
    Surname,
    Given,
}

impl AuthorCapture {
    fn start(&mut self, local_name: &[u8], depth: usize) {
        match local_name {
            b"contrib-group" if !self.group_done && self.group_depth.is_none() => {
                self.group_depth = Some(depth);
            }
            b"name" if self.group_depth.is_some() => {
                self.in_name = true;
                self.surname.clear();
                self.given.clear();
            }
            b"surname" if self.in_name => self.field = Some(NamePart::Surname),
            b"given-names" if self.in_name => self.field = Some(NamePart::Given),
            _ => {}
        }
    }

    fn end(&mut self, local_name: &[u8], depth: usize) {
        match local_name {
            b"surname" | b"given-names" => self.field = None,
            b"name" if self.in_name => {
                self.in_name = false;
                if let Some(author) = format_author(&self.surname, &self.given) {
                    self.authors.push(author);
                }
            }
            b"contrib-group" if self.group_depth == Some(depth) => {
                self.group_depth = None;
                self.group_done = true;
            }
            _ => {}
        }
    }

    fn push(&mut self, text: &str) {
        match self.field {
            Some(NamePart::Surname) => self.surname.push_str(text),
            Some(NamePart::Given) => self.given.push_str(text),
            None => {}
        }
    }
}

/// Formats an author as `Surname, Given names`, the key used for authorship matching.
fn format_author(surname: &str, given: &str) -> Option<String> {
    let surname = collapse_whitespace(surname);
    let given = collapse_whitespace(given);
    match (surname.is_empty(), given.is_empty()) {
        (true, true) => None,
        (false, true) => Some(surname),
        (true, false) => Some(given),
        (false, false) => Some(format!("{surname}, {given}")),
    }
}

impl FieldExtractor for JatsExtractor {
    fn extract(&self, input: &str) -> Result<ExtractedFields> {
        if input.trim().is_empty() {
            return Err(GrantError::Xml("Empty document".into()));
        }

        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(false);
        reader.config_mut().check_end_names = false;

        let mut sections = SectionCapture::default();
        let mut authors = AuthorCapture::default();
        let mut depth = 0usize;
        let mut failure = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    depth += 1;
                    sections.push(" ");
                    if let Some(section) = Section::for_element(e) {
                        sections.start(section, depth);
                    }
                    authors.start(e.local_name().as_ref(), depth);
                }
                Ok(Event::End(ref e)) => {
                    sections.push(" ");
                    sections.end(depth);
                    authors.end(e.local_name().as_ref(), depth);
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Empty(_)) => sections.push(" "),
                Ok(Event::Text(ref e)) => {
                    let raw = String::from_utf8_lossy(e);
                    let text = unescape_text(&raw);
                    sections.push(&text);
                    authors.push(&text);
                }
                Ok(Event::CData(ref e)) => {
                    let text = String::from_utf8_lossy(e);
                    sections.push(&text);
                    authors.push(&text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    failure = Some(GrantError::from(e));
                    break;
                }
                _ => (),
            }
        }

        let mut fields = ExtractedFields {
            title: sections.take(Section::Title),
            journal: sections.take(Section::Journal),
            authors: authors.authors,
            grant_number: None,
            pmid: sections.take(Section::Pmid),
            ack_text: sections.take(Section::Ack),
            abstract_text: sections.take(Section::Abstract),
            body_text: sections.take(Section::Body),
        };
        fields.grant_number = fields
            .funding_text()
            .and_then(|text| funding::extract_grant_number(&text));

        if fields.is_empty() {
            return Err(failure.unwrap_or_else(|| GrantError::Xml("No article fields found".into())));
        }

        match failure {
            Some(err) => {
                tracing::debug!(error = %err, "markup error, keeping partial fields");
                Ok(fields)
            }
            None => Ok(fields),
        }
    }
}
