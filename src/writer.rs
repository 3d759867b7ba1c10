use std::io::Write;

use log::warn;

use crate::{
    crypt::SecurityHandler,
    document::{Document, Mode},
    error::{PdfError, PdfResult},
    objects::{Dictionary, Name, Object, Reference},
    resolve::Resolve,
    xref::XrefEntry,
};

/// Sink adapter that tracks the absolute offset of every byte written,
/// which is all the xref table needs.
pub(crate) struct CountingWriter<W: Write> {
    inner: W,
    offset: usize,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, offset: 0 }
    }

    fn offset(&self) -> usize {
        self.offset
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.offset += written;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Serialize the whole document: header, body objects in number order,
/// classic xref table, trailer, startxref, and the %%EOF marker.
pub(crate) fn write_document(doc: &mut Document, sink: impl Write) -> PdfResult<()> {
    prepare(doc)?;

    let mut w = CountingWriter::new(sink);

    w.write_all(format!("%PDF-{}\n", doc.version).as_bytes())?;
    // binary-tag comment so transports treat the file as eight-bit data
    w.write_all(b"%\xE2\xE3\xCF\xD3\n")?;

    let mut written: Vec<(usize, usize, u16)> = Vec::new();

    let numbers: Vec<usize> = doc.objects.keys().copied().collect();
    let size = numbers.iter().max().map_or(1, |max| max + 1);

    for number in numbers {
        let slot = match doc.objects.get(&number) {
            Some(slot) => slot,
            None => continue,
        };

        // xref streams and expanded containers are not carried over;
        // their contents are rewritten uncompressed
        if is_xref_or_container(&slot.value) {
            continue;
        }

        let reference = Reference::new(number, slot.generation);
        let encryption = encryption_for(doc, reference);

        written.push((number, w.offset(), slot.generation));

        w.write_all(format!("{} {} obj\n", number, slot.generation).as_bytes())?;
        write_object_body(&mut w, &slot.value, encryption)?;
        w.write_all(b"\nendobj\n")?;
    }

    let startxref = w.offset();

    w.write_all(b"xref\n")?;
    w.write_all(format!("0 {}\n", size).as_bytes())?;
    w.write_all(b"0000000000 65535 f \n")?;

    let mut written_iter = written.iter().peekable();

    for number in 1..size {
        match written_iter.peek() {
            Some(&&(n, offset, generation)) if n == number => {
                written_iter.next();
                w.write_all(format!("{:010} {:05} n \n", offset, generation).as_bytes())?;
            }
            _ => {
                w.write_all(b"0000000000 65535 f \n")?;
            }
        }
    }

    let trailer = build_trailer(doc, size)?;
    let mut out = Vec::new();
    push_value(&mut out, &Object::Dictionary(trailer), None)?;

    w.write_all(b"trailer\n")?;
    w.write_all(&out)?;
    w.write_all(format!("\nstartxref\n{}\n%%EOF\n", startxref).as_bytes())?;
    w.flush()?;

    Ok(())
}

/// Pre-save pass: materialize everything the body needs while the document
/// is still mutable.
fn prepare(doc: &mut Document) -> PdfResult<()> {
    // pull every object the xref knows about into the table so the body
    // is complete; unreadable objects degrade to free entries
    let to_load: Vec<Reference> = doc
        .xref
        .entries
        .iter()
        .filter_map(|(&number, entry)| match entry {
            XrefEntry::InUse { generation, .. } => Some(Reference::new(number, *generation)),
            XrefEntry::Compressed { .. } => Some(Reference::new(number, 0)),
            XrefEntry::Free { .. } => None,
        })
        .collect();

    for reference in to_load {
        if let Err(err) = doc.resolve_reference(reference) {
            warn!("dropping unreadable object {}: {:#}", reference.number, err);
        }
    }

    if doc.mode == Mode::Write {
        build_page_tree(doc)?;
    }

    if doc.root_ref.is_none() {
        anyhow::bail!(PdfError::Reference("document has no /Root to write".into()));
    }

    if doc.security.is_some() && doc.encrypt_ref.is_none() {
        let dict = doc.security.as_ref().unwrap().encryption_dict();
        doc.encrypt_ref = Some(doc.add_object(Object::Dictionary(dict)));
    }

    Ok(())
}

/// Give the page list a tree: kids and count on the preallocated root,
/// a parent link on every page, and the catalog referencing the root.
fn build_page_tree(doc: &mut Document) -> PdfResult<()> {
    let pages_root = match doc.pages_root {
        Some(pages_root) => pages_root,
        None => {
            let mut dict = Dictionary::new();
            dict.insert("Type", Object::name("Pages"));
            let pages_root = doc.add_object(Object::Dictionary(dict));
            doc.pages_root = Some(pages_root);
            pages_root
        }
    };

    for page_ref in doc.pages.clone() {
        let mut dict = match doc.resolve_reference(page_ref)? {
            Object::Dictionary(dict) => dict,
            obj => {
                warn!("page object {} is a {}, skipping", page_ref.number, obj.kind());
                continue;
            }
        };

        dict.insert("Parent", Object::Reference(pages_root));
        doc.replace_object(page_ref, Object::Dictionary(dict));
    }

    let mut root_dict = match doc.resolve_reference(pages_root)? {
        Object::Dictionary(dict) => dict,
        _ => Dictionary::new(),
    };

    root_dict.insert("Type", Object::name("Pages"));
    root_dict.insert(
        "Kids",
        Object::Array(doc.pages.iter().map(|&r| Object::Reference(r)).collect()),
    );
    root_dict.insert("Count", doc.pages.len() as i64);

    if root_dict.get("MediaBox").is_none() {
        root_dict.insert("MediaBox", rect_array(doc.media_box));
    }

    if let Some(crop_box) = doc.crop_box {
        if root_dict.get("CropBox").is_none() {
            root_dict.insert("CropBox", rect_array(crop_box));
        }
    }

    doc.replace_object(pages_root, Object::Dictionary(root_dict));

    if doc.root_ref.is_none() {
        let mut catalog = Dictionary::new();
        catalog.insert("Type", Object::name("Catalog"));
        catalog.insert("Pages", Object::Reference(pages_root));

        doc.root_ref = Some(doc.add_object(Object::Dictionary(catalog)));
    }

    Ok(())
}

fn rect_array(rect: [f64; 4]) -> Object {
    Object::Array(rect.iter().map(|&n| Object::Number(n)).collect())
}

fn build_trailer(doc: &Document, size: usize) -> PdfResult<Dictionary> {
    let mut trailer = Dictionary::new();

    trailer.insert("Size", size as i64);

    let root = doc
        .root_ref
        .ok_or_else(|| PdfError::Reference("document has no /Root to write".into()))?;
    trailer.insert("Root", Object::Reference(root));

    if let Some(info) = doc.info_ref {
        trailer.insert("Info", Object::Reference(info));
    }

    if let Some(encrypt) = doc.encrypt_ref {
        trailer.insert("Encrypt", Object::Reference(encrypt));
    }

    if let Some((first, second)) = &doc.file_id {
        trailer.insert(
            "ID",
            Object::Array(vec![
                Object::Binary(first.clone()),
                Object::Binary(second.clone()),
            ]),
        );
    }

    Ok(trailer)
}

/// A /Crypt entry in /Filter means the stream manages its own encryption
/// (in practice, /Identity), so save leaves its bytes alone.
fn has_crypt_filter(dict: &Dictionary) -> bool {
    match dict.get("Filter") {
        Some(Object::Name(name)) => *name == "Crypt",
        Some(Object::Array(items)) => items
            .iter()
            .any(|obj| matches!(obj, Object::Name(name) if *name == "Crypt")),
        _ => false,
    }
}

fn is_xref_or_container(obj: &Object) -> bool {
    if let Object::Stream(stream) = obj {
        if let Some(Object::Name(name)) = stream.dict.get("Type") {
            return *name == "XRef" || *name == "ObjStm";
        }
    }

    false
}

fn encryption_for<'a>(
    doc: &'a Document,
    reference: Reference,
) -> Option<(&'a SecurityHandler, Reference)> {
    let handler = doc.security.as_ref()?;

    // strings inside the encryption dictionary stay plaintext
    if doc
        .encrypt_ref
        .map_or(false, |r| r.number == reference.number)
    {
        return None;
    }

    Some((handler, reference))
}

fn write_object_body(
    w: &mut impl Write,
    obj: &Object,
    encryption: Option<(&SecurityHandler, Reference)>,
) -> PdfResult<()> {
    if let Object::Stream(stream) = obj {
        let mut dict = stream.dict.clone();
        let mut data = stream.data.clone();

        if let Some((handler, reference)) = encryption {
            if !has_crypt_filter(&dict) {
                data = handler.encrypt(&data, reference)?;
            }
        }

        dict.insert("Length", data.len() as i64);

        let mut out = Vec::new();
        push_value(&mut out, &Object::Dictionary(dict), encryption)?;
        w.write_all(&out)?;
        w.write_all(b"\nstream\n")?;
        w.write_all(&data)?;
        w.write_all(b"\nendstream")?;

        return Ok(());
    }

    let mut out = Vec::new();
    push_value(&mut out, obj, encryption)?;
    w.write_all(&out)?;

    Ok(())
}

/// Serialize a direct value.
pub(crate) fn push_value(
    out: &mut Vec<u8>,
    obj: &Object,
    encryption: Option<(&SecurityHandler, Reference)>,
) -> PdfResult<()> {
    match obj {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Number(n) => push_number(out, *n),
        Object::Name(name) => push_name(out, name),
        Object::String(bytes) => match encryption {
            Some((handler, reference)) => {
                push_hex_string(out, &handler.encrypt(bytes, reference)?);
            }
            None => push_literal_string(out, bytes),
        },
        Object::Binary(bytes) => match encryption {
            Some((handler, reference)) => {
                push_hex_string(out, &handler.encrypt(bytes, reference)?);
            }
            None => push_hex_string(out, bytes),
        },
        Object::Date(seconds) => {
            let spelled = crate::date::format(*seconds);

            match encryption {
                Some((handler, reference)) => {
                    push_hex_string(out, &handler.encrypt(spelled.as_bytes(), reference)?);
                }
                None => push_literal_string(out, spelled.as_bytes()),
            }
        }
        Object::Array(items) => {
            out.push(b'[');

            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b' ');
                }

                push_value(out, item, encryption)?;
            }

            out.push(b']');
        }
        Object::Dictionary(dict) => {
            out.extend_from_slice(b"<<");

            for (name, value) in dict.iter() {
                out.push(b' ');
                push_name(out, name);
                out.push(b' ');
                push_value(out, value, encryption)?;
            }

            out.extend_from_slice(b" >>");
        }
        Object::Reference(r) => {
            out.extend_from_slice(format!("{} {} R", r.number, r.generation).as_bytes());
        }
        Object::Stream(..) => {
            anyhow::bail!(PdfError::State(
                "stream object nested inside a direct value".into()
            ));
        }
    }

    Ok(())
}

/// Integers print as integers; reals keep at most six decimal places.
fn push_number(out: &mut Vec<u8>, n: f64) {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        out.extend_from_slice(format!("{}", n as i64).as_bytes());
        return;
    }

    let mut spelled = format!("{:.6}", n);

    while spelled.ends_with('0') {
        spelled.pop();
    }
    if spelled.ends_with('.') {
        spelled.pop();
    }

    out.extend_from_slice(spelled.as_bytes());
}

fn push_name(out: &mut Vec<u8>, name: &Name) {
    out.push(b'/');

    for c in name.as_str().chars() {
        let code = c as u32;

        if (0x21..=0x7E).contains(&code)
            && !crate::lex::is_delimiter_byte(code as u8)
            && c != '#'
        {
            out.push(code as u8);
        } else if code < 0x100 {
            out.extend_from_slice(format!("#{:02X}", code).as_bytes());
        } else {
            // names are byte strings; non-latin text travels as UTF-8
            for b in c.to_string().as_bytes() {
                out.extend_from_slice(format!("#{:02X}", b).as_bytes());
            }
        }
    }
}

fn push_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');

    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7E => out.push(b),
            _ => out.extend_from_slice(format!("\\{:03o}", b).as_bytes()),
        }
    }

    out.push(b')');
}

fn push_hex_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'<');

    for b in bytes {
        out.extend_from_slice(format!("{:02X}", b).as_bytes());
    }

    out.push(b'>');
}
