//! S3 XML response rendering and request parsing.
//!
//! Responses are produced with `quick-xml`'s event writer.  Writing into an
//! in-memory buffer cannot fail, so the helpers below panic only on
//! programmer error (unbalanced tags), never on input.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::S3Error;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Small builder around a `quick_xml::Writer` writing into memory.
struct XmlDoc {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlDoc {
    fn new() -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .expect("xml decl");
        Self { writer }
    }

    /// Open the document root, tagged with the S3 namespace.
    fn root(mut self, tag: &str) -> Self {
        let start = BytesStart::new(tag).with_attributes([("xmlns", S3_XMLNS)]);
        self.writer
            .write_event(Event::Start(start))
            .expect("start root");
        self
    }

    fn open(&mut self, tag: &str) {
        self.writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .expect("start tag");
    }

    fn close(&mut self, tag: &str) {
        self.writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .expect("end tag");
    }

    /// Write `<tag>text</tag>`.
    fn text(&mut self, tag: &str, text: &str) {
        self.open(tag);
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .expect("text");
        self.close(tag);
    }

    /// Write a parent element holding a flat list of text children.
    fn group(&mut self, parent: &str, children: &[(&str, &str)]) {
        self.open(parent);
        for (tag, value) in children {
            self.text(tag, value);
        }
        self.close(parent);
    }

    fn finish(self) -> String {
        String::from_utf8(self.writer.into_inner().into_inner()).expect("valid utf-8")
    }
}

fn bool_text(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

// ── Error response ──────────────────────────────────────────────────

/// Render an S3 `<Error>` document.
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.group(
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );
    doc.finish()
}

// ── Buckets ─────────────────────────────────────────────────────────

/// Render `<ListAllMyBucketsResult>`; `buckets` holds `(name, creation_date)`.
pub fn render_list_buckets_result(
    owner_id: &str,
    owner_display: &str,
    buckets: &[(&str, &str)],
) -> String {
    let mut doc = XmlDoc::new().root("ListAllMyBucketsResult");
    doc.group("Owner", &[("ID", owner_id), ("DisplayName", owner_display)]);
    doc.open("Buckets");
    for (name, date) in buckets {
        doc.group("Bucket", &[("Name", name), ("CreationDate", date)]);
    }
    doc.close("Buckets");
    doc.close("ListAllMyBucketsResult");
    doc.finish()
}

/// One row of a `<ListBucketResult>`.
pub struct ObjectEntry<'a> {
    pub key: &'a str,
    pub last_modified: &'a str,
    pub etag: &'a str,
    pub size: u64,
}

/// Render `<ListBucketResult>`.
pub fn render_list_objects_result(
    bucket: &str,
    prefix: &str,
    max_keys: usize,
    is_truncated: bool,
    entries: &[ObjectEntry<'_>],
) -> String {
    let mut doc = XmlDoc::new().root("ListBucketResult");
    doc.text("Name", bucket);
    doc.text("Prefix", prefix);
    doc.text("Marker", "");
    doc.text("MaxKeys", &max_keys.to_string());
    doc.text("IsTruncated", bool_text(is_truncated));
    for entry in entries {
        doc.open("Contents");
        doc.text("Key", entry.key);
        doc.text("LastModified", entry.last_modified);
        doc.text("ETag", entry.etag);
        doc.text("Size", &entry.size.to_string());
        doc.text("StorageClass", "STANDARD");
        doc.close("Contents");
    }
    doc.close("ListBucketResult");
    doc.finish()
}

// ── Objects ─────────────────────────────────────────────────────────

/// Render `<CopyObjectResult>`.
pub fn render_copy_object_result(etag: &str, last_modified: &str) -> String {
    let mut doc = XmlDoc::new();
    doc.group(
        "CopyObjectResult",
        &[("ETag", etag), ("LastModified", last_modified)],
    );
    doc.finish()
}

// ── Multipart ───────────────────────────────────────────────────────

/// Render `<InitiateMultipartUploadResult>`.
pub fn render_initiate_multipart_upload_result(bucket: &str, key: &str, upload_id: &str) -> String {
    let mut doc = XmlDoc::new().root("InitiateMultipartUploadResult");
    doc.text("Bucket", bucket);
    doc.text("Key", key);
    doc.text("UploadId", upload_id);
    doc.close("InitiateMultipartUploadResult");
    doc.finish()
}

/// Render `<CompleteMultipartUploadResult>`.
pub fn render_complete_multipart_upload_result(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    let mut doc = XmlDoc::new().root("CompleteMultipartUploadResult");
    doc.text("Location", location);
    doc.text("Bucket", bucket);
    doc.text("Key", key);
    doc.text("ETag", etag);
    doc.close("CompleteMultipartUploadResult");
    doc.finish()
}

/// One pending upload in `<ListMultipartUploadsResult>`.
pub struct UploadEntry<'a> {
    pub key: &'a str,
    pub upload_id: &'a str,
    pub initiated: &'a str,
}

/// Render `<ListMultipartUploadsResult>`.
pub fn render_list_multipart_uploads_result(bucket: &str, entries: &[UploadEntry<'_>]) -> String {
    let mut doc = XmlDoc::new().root("ListMultipartUploadsResult");
    doc.text("Bucket", bucket);
    doc.text("KeyMarker", "");
    doc.text("UploadIdMarker", "");
    doc.text("MaxUploads", "1000");
    doc.text("IsTruncated", "false");
    for entry in entries {
        doc.open("Upload");
        doc.text("Key", entry.key);
        doc.text("UploadId", entry.upload_id);
        doc.text("StorageClass", "STANDARD");
        doc.text("Initiated", entry.initiated);
        doc.close("Upload");
    }
    doc.close("ListMultipartUploadsResult");
    doc.finish()
}

/// One uploaded part in `<ListPartsResult>`.
pub struct PartEntry<'a> {
    pub part_number: u32,
    pub etag: &'a str,
    pub size: u64,
}

/// Render `<ListPartsResult>`.
pub fn render_list_parts_result(
    bucket: &str,
    key: &str,
    upload_id: &str,
    parts: &[PartEntry<'_>],
) -> String {
    let mut doc = XmlDoc::new().root("ListPartsResult");
    doc.text("Bucket", bucket);
    doc.text("Key", key);
    doc.text("UploadId", upload_id);
    doc.text("StorageClass", "STANDARD");
    doc.text("IsTruncated", "false");
    for part in parts {
        doc.open("Part");
        doc.text("PartNumber", &part.part_number.to_string());
        doc.text("ETag", part.etag);
        doc.text("Size", &part.size.to_string());
        doc.close("Part");
    }
    doc.close("ListPartsResult");
    doc.finish()
}

// ── Request parsing ─────────────────────────────────────────────────

/// A `<Part>` entry from a CompleteMultipartUpload request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// Client-supplied validator, checked against the stored part when present.
    pub etag: Option<String>,
}

/// Parse a `<CompleteMultipartUpload>` body into its ordered part list.
///
/// `PartNumber` is mandatory for every `<Part>`; `ETag` is optional.
pub fn parse_complete_multipart_upload_xml(body: &[u8]) -> Result<Vec<CompletedPart>, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut parts = Vec::new();
    let mut in_part = false;
    let mut current_tag = String::new();
    let mut part_number: Option<u32> = None;
    let mut etag: Option<String> = None;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "CompleteMultipartUpload" => saw_root = true,
                    "Part" => {
                        in_part = true;
                        part_number = None;
                        etag = None;
                    }
                    _ if in_part => current_tag = name,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_part => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?;
                match current_tag.as_str() {
                    "PartNumber" => {
                        part_number = Some(text.trim().parse().map_err(|_| S3Error::MalformedXML)?)
                    }
                    "ETag" => etag = Some(text.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Part" {
                    in_part = false;
                    current_tag.clear();
                    let part_number = part_number.take().ok_or(S3Error::MalformedXML)?;
                    parts.push(CompletedPart {
                        part_number,
                        etag: etag.take(),
                    });
                } else if in_part {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root || parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }
    Ok(parts)
}
