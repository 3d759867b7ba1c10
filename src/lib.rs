//! PDF object-graph engine: parse, build, and rewrite PDF files without a
//! rendering stack.
//!
//! The crate covers the layers that realize the PDF data model on disk:
//! the tokenizer, the typed value tree, indirect objects with
//! cross-reference resolution (classic tables and xref streams, including
//! compressed object streams), stream codecs (Flate with PNG predictors,
//! ASCIIHex/ASCII85/LZW/RunLength, passthrough for image filters), the
//! standard security handler (RC4-40/128, AES-128, AES-256), and a writer
//! that emits body objects, a classic xref table, and a trailer.
//!
//! Reading:
//!
//! ```no_run
//! use pdfcore::Document;
//!
//! let mut doc = Document::open("report.pdf")?;
//! println!("{} pages, title {:?}", doc.page_count(), doc.title()?);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Writing:
//!
//! ```no_run
//! use pdfcore::{Dictionary, Document, Object, StreamFilter};
//!
//! let mut doc = Document::create();
//! doc.set_title("Hello")?;
//!
//! let contents = {
//!     let mut stream = doc.create_stream(Dictionary::new(), StreamFilter::flate())?;
//!     stream.puts("BT /F1 24 Tf 72 720 Td (Hello, world!) Tj ET\n");
//!     stream.finish()?
//! };
//!
//! let mut page = Dictionary::new();
//! page.insert("Contents", Object::Reference(contents));
//! doc.append_page(page)?;
//!
//! doc.save("hello.pdf")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod copy;
mod crypt;
mod date;
mod document;
mod error;
mod filter;
mod lex;
mod object_stream;
mod objects;
mod page;
mod resolve;
mod stream;
mod string_pool;
mod trailer;
mod writer;
mod xref;

pub use crate::{
    crypt::{EncryptionMode, Permissions},
    document::{Document, ErrorHook, Mode, OpenOptions, PasswordProvider},
    error::{PdfError, PdfResult},
    filter::{FlateParams, PredictorKind, StreamFilter},
    objects::{Dictionary, Name, Object, Reference, Stream},
    resolve::Resolve,
    stream::{StreamReader, StreamWriter, Token},
};

pub use crate::date::{format as format_date, parse as parse_date};
