use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Write,
    path::Path,
    rc::Rc,
};

use log::{debug, warn};
use rand::RngCore;

use crate::{
    crypt::{EncryptionMode, Permissions, SecurityHandler},
    date,
    error::{PdfError, PdfResult},
    filter::{self, StreamFilter},
    lex::{LexBase, LexObject},
    object_stream,
    objects::{Dictionary, Name, Object, Reference, Stream},
    page,
    resolve::Resolve,
    stream::{StreamReader, StreamWriter},
    string_pool::StringPool,
    trailer::Trailer,
    writer,
    xref::{parser::XrefParser, ByteOffset, Xref, XrefEntry},
};

/// How many times the password provider is consulted before giving up.
const MAX_PASSWORD_ATTEMPTS: usize = 4;

/// Recursion bound for object loading (an object whose /Length is an
/// indirect number, whose value is an indirect number, ...).
const MAX_LOAD_DEPTH: usize = 32;

pub type PasswordProvider = Box<dyn FnMut(&str) -> Option<String>>;

/// Called with a human-readable message before an error is returned from a
/// document-level operation. The return value is advisory; `true` asks the
/// library to stop the running operation (it already is stopping).
pub type ErrorHook = Box<dyn FnMut(&str) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Default)]
pub struct OpenOptions {
    password_provider: Option<PasswordProvider>,
    error_hook: Option<ErrorHook>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try a fixed password.
    pub fn password(self, password: &str) -> Self {
        let password = password.to_owned();
        self.password_provider(move |_| Some(password.clone()))
    }

    /// Consult a callback for passwords; returning `None` stops the
    /// attempts. Called a small bounded number of times.
    pub fn password_provider(
        mut self,
        provider: impl FnMut(&str) -> Option<String> + 'static,
    ) -> Self {
        self.password_provider = Some(Box::new(provider));
        self
    }

    pub fn error_hook(mut self, hook: impl FnMut(&str) -> bool + 'static) -> Self {
        self.error_hook = Some(Box::new(hook));
        self
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub generation: u16,
    pub value: Object,
}

/// One open PDF: the object table, xref, trailer state, page registry,
/// interned-string pool, and (when present) the security handler.
///
/// A document is single-threaded state; the caller provides any outer
/// synchronization.
pub struct Document {
    pub(crate) id: u64,
    pub(crate) mode: Mode,
    pub(crate) version: String,
    source: Rc<Vec<u8>>,
    /// Loaded and created objects, sorted by number.
    pub(crate) objects: BTreeMap<usize, Slot>,
    pub(crate) xref: Xref,
    pub(crate) trailer: Option<Trailer>,
    pub(crate) security: Option<SecurityHandler>,
    pub(crate) encrypt_ref: Option<Reference>,
    pub(crate) file_id: Option<(Vec<u8>, Vec<u8>)>,
    pub(crate) pages: Vec<Reference>,
    pub(crate) pages_root: Option<Reference>,
    pub(crate) info_ref: Option<Reference>,
    pub(crate) root_ref: Option<Reference>,
    pub(crate) media_box: [f64; 4],
    pub(crate) crop_box: Option<[f64; 4]>,
    pool: StringPool,
    copy_map: HashMap<(u64, usize), Reference>,
    error_hook: Option<ErrorHook>,
    load_depth: usize,
    expanded_containers: HashSet<usize>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("version", &self.version)
            .field("objects", &self.objects)
            .field("xref", &self.xref)
            .field("trailer", &self.trailer)
            .field("security", &self.security)
            .field("encrypt_ref", &self.encrypt_ref)
            .field("file_id", &self.file_id)
            .field("pages", &self.pages)
            .field("pages_root", &self.pages_root)
            .field("info_ref", &self.info_ref)
            .field("root_ref", &self.root_ref)
            .field("media_box", &self.media_box)
            .field("crop_box", &self.crop_box)
            .field("load_depth", &self.load_depth)
            .field("expanded_containers", &self.expanded_containers)
            .finish()
    }
}

impl Document {
    // ------------------------------------------------------------------
    // lifecycle

    pub fn open(path: impl AsRef<Path>) -> PdfResult<Self> {
        Self::open_with(path, OpenOptions::new())
    }

    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> PdfResult<Self> {
        let bytes = std::fs::read(&path).map_err(PdfError::from)?;

        Self::from_bytes(bytes, options)
    }

    /// Open a document already in memory.
    pub fn from_bytes(bytes: Vec<u8>, mut options: OpenOptions) -> PdfResult<Self> {
        let mut doc = Self::empty(Mode::Read);
        doc.source = Rc::new(bytes);
        doc.error_hook = options.error_hook.take();

        match doc.load(options.password_provider.take()) {
            Ok(()) => Ok(doc),
            Err(err) => Err(doc.report(err)),
        }
    }

    /// Start a new document for writing.
    ///
    /// The page-tree root and information dictionary are preallocated and a
    /// fresh random 16-byte file ID is generated, used twice in /ID.
    pub fn create() -> Self {
        let mut doc = Self::empty(Mode::Write);

        let mut file_id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut file_id);
        doc.file_id = Some((file_id.clone(), file_id));

        let mut pages = Dictionary::new();
        pages.insert("Type", Object::name("Pages"));
        let pages_ref = doc.add_object(Object::Dictionary(pages));
        doc.pages_root = Some(pages_ref);

        let info_ref = doc.add_object(Object::Dictionary(Dictionary::new()));
        doc.info_ref = Some(info_ref);

        doc
    }

    fn empty(mode: Mode) -> Self {
        Self {
            id: rand::thread_rng().next_u64(),
            mode,
            version: "1.7".to_owned(),
            source: Rc::new(Vec::new()),
            objects: BTreeMap::new(),
            xref: Xref::default(),
            trailer: None,
            security: None,
            encrypt_ref: None,
            file_id: None,
            pages: Vec::new(),
            pages_root: None,
            info_ref: None,
            root_ref: None,
            media_box: [0.0, 0.0, 612.0, 792.0],
            crop_box: None,
            pool: StringPool::new(),
            copy_map: HashMap::new(),
            error_hook: None,
            load_depth: 0,
            expanded_containers: HashSet::new(),
        }
    }

    /// Serialize to a file: header, body, classic xref, trailer.
    pub fn save(&mut self, path: impl AsRef<Path>) -> PdfResult<()> {
        let file = std::fs::File::create(path).map_err(PdfError::from)?;

        self.save_to(std::io::BufWriter::new(file))
    }

    /// Serialize to any sink. A plain `Write` impl is the output callback.
    pub fn save_to(&mut self, sink: impl Write) -> PdfResult<()> {
        match writer::write_document(self, sink) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(err)),
        }
    }

    pub fn set_error_hook(&mut self, hook: impl FnMut(&str) -> bool + 'static) {
        self.error_hook = Some(Box::new(hook));
    }

    fn report(&mut self, err: anyhow::Error) -> anyhow::Error {
        if let Some(hook) = &mut self.error_hook {
            let _ = hook(&format!("{:#}", err));
        }

        err
    }

    // ------------------------------------------------------------------
    // opening

    fn load(&mut self, mut provider: Option<PasswordProvider>) -> PdfResult<()> {
        self.version = parse_header(&self.source)?;

        let source = Rc::clone(&self.source);
        let mut parser = XrefParser::new(&source);

        let mut offset = Some(parser.find_startxref()?);
        let mut visited = HashSet::new();
        let mut xref: Option<Xref> = None;
        let mut trailer: Option<Trailer> = None;

        while let Some(section_offset) = offset {
            if !visited.insert(section_offset) {
                warn!("circular /Prev chain at offset {}", section_offset);
                break;
            }

            let section = parser.read_section(section_offset)?;
            let section_trailer = Trailer::from_dict(&section.trailer)?;

            if let Some(stm) = section_trailer.xref_stm {
                debug!("ignoring hybrid-reference /XRefStm at offset {}", stm);
            }

            offset = section_trailer.prev;

            match &mut xref {
                Some(xref) => xref.merge_previous(section.xref),
                None => xref = Some(section.xref),
            }

            match &mut trailer {
                Some(trailer) => trailer.merge_previous(section_trailer),
                None => trailer = Some(section_trailer),
            }
        }

        self.xref = xref.unwrap_or_default();

        let trailer =
            trailer.ok_or_else(|| PdfError::Syntax("file has no cross-reference section".into()))?;

        let root = trailer
            .root
            .ok_or_else(|| PdfError::Reference("trailer has no /Root".into()))?;

        self.root_ref = Some(root);
        self.info_ref = trailer.info;
        self.file_id = trailer.id.clone();
        let encrypt = trailer.encrypt.clone();
        self.trailer = Some(trailer);

        if let Some(encrypt) = encrypt {
            self.setup_encryption(encrypt, provider.as_mut())?;
        }

        let catalog = self.assert_dict(Object::Reference(root))?;

        match catalog.get_reference("Pages")? {
            Some(pages_root) => {
                self.pages_root = Some(pages_root);
                self.pages = page::flatten_page_tree(self, pages_root)?;
            }
            None => warn!("document catalog has no /Pages tree"),
        }

        debug!(
            "opened PDF {} with {} objects, {} pages",
            self.version,
            self.xref.len(),
            self.pages.len()
        );

        Ok(())
    }

    fn setup_encryption(
        &mut self,
        encrypt: Object,
        mut provider: Option<&mut PasswordProvider>,
    ) -> PdfResult<()> {
        self.encrypt_ref = match &encrypt {
            Object::Reference(r) => Some(*r),
            _ => None,
        };

        let dict = self.assert_dict(encrypt)?;
        let id_first = self
            .file_id
            .as_ref()
            .map(|(first, _)| first.clone())
            .unwrap_or_default();

        let mut password = String::new();

        for attempt in 0..=MAX_PASSWORD_ATTEMPTS {
            if let Some(handler) =
                SecurityHandler::from_dict(&dict, &id_first, password.as_bytes(), self)?
            {
                // objects loaded before the handler existed hold raw
                // encrypted strings; drop them so they reload decrypted
                self.objects.clear();
                self.expanded_containers.clear();
                self.security = Some(handler);

                return Ok(());
            }

            if attempt == MAX_PASSWORD_ATTEMPTS {
                break;
            }

            password = match provider.as_deref_mut().and_then(|p| p("document")) {
                Some(password) => password,
                None => break,
            };
        }

        Err(PdfError::Crypto("password rejected".into()).into())
    }

    // ------------------------------------------------------------------
    // objects

    /// Allocate the next object number.
    pub fn add_object(&mut self, value: Object) -> Reference {
        let number = self.next_object_number();

        self.objects.insert(
            number,
            Slot {
                generation: 0,
                value,
            },
        );

        Reference::new(number, 0)
    }

    pub(crate) fn replace_object(&mut self, reference: Reference, value: Object) {
        self.objects.insert(
            reference.number,
            Slot {
                generation: reference.generation,
                value,
            },
        );
    }

    fn next_object_number(&self) -> usize {
        let highest_loaded = self.objects.keys().next_back().copied().unwrap_or(0);

        highest_loaded.max(self.xref.max_object_number()) + 1
    }

    /// Numbers of all currently loaded or created objects.
    pub fn loaded_object_numbers(&self) -> Vec<usize> {
        self.objects.keys().copied().collect()
    }

    /// Find an object by number, loading it if the xref knows it.
    pub fn object(&mut self, number: usize) -> PdfResult<Object> {
        let generation = match self.xref.get(number) {
            Some(XrefEntry::InUse { generation, .. }) => *generation,
            _ => self
                .objects
                .get(&number)
                .map(|slot| slot.generation)
                .unwrap_or(0),
        };

        self.resolve_reference(Reference::new(number, generation))
    }

    pub(crate) fn intern(&mut self, name: &Name) -> Name {
        self.pool.intern_name(name)
    }

    pub(crate) fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Open a stream object for reading: decrypt if the document is
    /// encrypted, run the filter chain, and wrap the decoded bytes.
    pub fn open_stream(&mut self, reference: Reference) -> PdfResult<StreamReader> {
        let obj = self.resolve_reference(reference)?;
        let stream = self.assert_stream(obj)?;

        let identity = filter::crypt_identity(&stream.dict, self)?;
        let mut data = stream.data;

        // in write mode the buffered bytes are still plaintext; decryption
        // only applies to data that came off the file
        if self.mode == Mode::Read {
            if let Some(handler) = &self.security {
                let is_encrypt_dict = self
                    .encrypt_ref
                    .map_or(false, |r| r.number == reference.number);

                if !identity && !is_encrypt_dict {
                    data = handler.decrypt(&data, reference)?;
                }
            }
        }

        let decoded = filter::decode_stream(&data, &stream.dict, self)?;

        Ok(StreamReader::new(decoded))
    }

    /// Start a stream object for writing. The dictionary holds any entries
    /// the stream should carry beyond the codec bookkeeping.
    pub fn create_stream(
        &mut self,
        dict: Dictionary,
        filter: StreamFilter,
    ) -> PdfResult<StreamWriter<'_>> {
        self.require_write()?;

        let reference = self.add_object(Object::Null);

        Ok(StreamWriter::new(self, reference, dict, filter))
    }

    fn require_write(&mut self) -> PdfResult<()> {
        if self.mode != Mode::Write {
            let err: anyhow::Error =
                PdfError::State("write operation on a read-mode document".into()).into();

            return Err(self.report(err));
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // pages

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// O(1) lookup in the flattened page list.
    pub fn page(&self, index: usize) -> Option<Reference> {
        self.pages.get(index).copied()
    }

    pub fn page_dict(&mut self, index: usize) -> PdfResult<Dictionary> {
        let reference = self
            .page(index)
            .ok_or_else(|| PdfError::Reference(format!("no page {}", index)))?;

        self.assert_dict(Object::Reference(reference))
    }

    /// A page attribute, consulting ancestors for the inheritable ones.
    pub fn page_attribute(&mut self, index: usize, key: &str) -> PdfResult<Option<Object>> {
        let reference = self
            .page(index)
            .ok_or_else(|| PdfError::Reference(format!("no page {}", index)))?;

        page::inherited_attribute(self, reference, key)
    }

    /// The page's effective MediaBox as `[llx, lly, urx, ury]`.
    pub fn page_media_box(&mut self, index: usize) -> PdfResult<Option<[f64; 4]>> {
        match self.page_attribute(index, "MediaBox")? {
            Some(obj) => {
                let arr = self.assert_arr(obj)?;

                if arr.len() != 4 {
                    anyhow::bail!(PdfError::Syntax(format!(
                        "/MediaBox with {} entries",
                        arr.len()
                    )));
                }

                let mut rect = [0.0; 4];
                for (slot, obj) in rect.iter_mut().zip(arr) {
                    *slot = self.assert_number(obj)?;
                }

                Ok(Some(rect))
            }
            None => Ok(None),
        }
    }

    /// Register a new page at the end of the document.
    pub fn append_page(&mut self, mut dict: Dictionary) -> PdfResult<Reference> {
        self.require_write()?;

        if dict.get("Type").is_none() {
            dict.insert("Type", Object::name("Page"));
        }

        let reference = self.add_object(Object::Dictionary(dict));
        self.pages.push(reference);

        Ok(reference)
    }

    /// Deep-copy a page out of another document and append it.
    ///
    /// Inheritable attributes are materialized onto the copied page so the
    /// copy renders identically outside its old tree.
    pub fn copy_page(&mut self, src: &mut Document, index: usize) -> PdfResult<Reference> {
        self.require_write()?;

        let page_ref = src.page(index).ok_or_else(|| {
            PdfError::Reference(format!("source document has no page {}", index))
        })?;

        let mut dict = src.assert_dict(Object::Reference(page_ref))?;
        dict.remove("Parent");

        for key in ["MediaBox", "CropBox", "Resources", "Rotate"] {
            if dict.get(key).is_none() {
                if let Some(value) = page::inherited_attribute(src, page_ref, key)? {
                    dict.insert(key, value);
                }
            }
        }

        let reference = self.add_object(Object::Null);
        self.map_copied_object(src.id, page_ref.number, reference);

        let copied = crate::copy::copy_value(self, src, &Object::Dictionary(dict))?;
        self.replace_object(reference, copied);
        self.pages.push(reference);

        Ok(reference)
    }

    /// Deep-copy an arbitrary indirect object from another document.
    pub fn copy_object(&mut self, src: &mut Document, reference: Reference) -> PdfResult<Reference> {
        crate::copy::copy_indirect(self, src, reference)
    }

    pub(crate) fn copied_object(&self, src_id: u64, src_number: usize) -> Option<Reference> {
        self.copy_map.get(&(src_id, src_number)).copied()
    }

    pub(crate) fn map_copied_object(&mut self, src_id: u64, src_number: usize, dest: Reference) {
        self.copy_map.insert((src_id, src_number), dest);
    }

    // ------------------------------------------------------------------
    // document-wide accessors

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = version.to_owned();
    }

    /// Default MediaBox applied to the page-tree root on save.
    pub fn set_media_box(&mut self, media_box: [f64; 4]) {
        self.media_box = media_box;
    }

    pub fn set_crop_box(&mut self, crop_box: [f64; 4]) {
        self.crop_box = Some(crop_box);
    }

    pub fn catalog(&mut self) -> PdfResult<Dictionary> {
        let root = self
            .root_ref
            .ok_or_else(|| PdfError::Reference("document has no catalog".into()))?;

        self.assert_dict(Object::Reference(root))
    }

    /// Encrypt the document on save with the standard security handler.
    pub fn set_encryption(
        &mut self,
        mode: EncryptionMode,
        user_password: &str,
        owner_password: &str,
        permissions: Permissions,
    ) -> PdfResult<()> {
        if self.file_id.is_none() {
            let mut file_id = vec![0u8; 16];
            rand::thread_rng().fill_bytes(&mut file_id);
            self.file_id = Some((file_id.clone(), file_id));
        }

        let id_first = self
            .file_id
            .as_ref()
            .map(|(first, _)| first.clone())
            .unwrap_or_default();

        self.security = Some(SecurityHandler::for_write(
            mode,
            user_password,
            owner_password,
            permissions,
            &id_first,
        )?);
        self.encrypt_ref = None;

        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_some()
    }

    pub fn encryption_mode(&self) -> Option<EncryptionMode> {
        self.security.as_ref().map(SecurityHandler::mode)
    }

    // ------------------------------------------------------------------
    // information dictionary

    pub fn info_dict(&mut self) -> PdfResult<Option<Dictionary>> {
        match self.info_ref {
            Some(info) => Ok(Some(self.assert_dict(Object::Reference(info))?)),
            None => Ok(None),
        }
    }

    pub fn title(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Title")
    }

    pub fn author(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Author")
    }

    pub fn subject(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Subject")
    }

    pub fn keywords(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Keywords")
    }

    pub fn creator(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Creator")
    }

    pub fn producer(&mut self) -> PdfResult<Option<String>> {
        self.info_text("Producer")
    }

    /// Seconds since the Unix epoch.
    pub fn creation_date(&mut self) -> PdfResult<Option<i64>> {
        match self.info_dict()? {
            Some(dict) => dict.get_date("CreationDate", self),
            None => Ok(None),
        }
    }

    pub fn modification_date(&mut self) -> PdfResult<Option<i64>> {
        match self.info_dict()? {
            Some(dict) => dict.get_date("ModDate", self),
            None => Ok(None),
        }
    }

    pub fn set_title(&mut self, title: &str) -> PdfResult<()> {
        self.set_info_value("Title", Object::string(title))
    }

    pub fn set_author(&mut self, author: &str) -> PdfResult<()> {
        self.set_info_value("Author", Object::string(author))
    }

    pub fn set_subject(&mut self, subject: &str) -> PdfResult<()> {
        self.set_info_value("Subject", Object::string(subject))
    }

    pub fn set_keywords(&mut self, keywords: &str) -> PdfResult<()> {
        self.set_info_value("Keywords", Object::string(keywords))
    }

    pub fn set_creator(&mut self, creator: &str) -> PdfResult<()> {
        self.set_info_value("Creator", Object::string(creator))
    }

    pub fn set_producer(&mut self, producer: &str) -> PdfResult<()> {
        self.set_info_value("Producer", Object::string(producer))
    }

    pub fn set_creation_date(&mut self, seconds: i64) -> PdfResult<()> {
        self.set_info_value("CreationDate", Object::Date(seconds))
    }

    pub fn set_modification_date(&mut self, seconds: i64) -> PdfResult<()> {
        self.set_info_value("ModDate", Object::Date(seconds))
    }

    fn info_text(&mut self, key: &str) -> PdfResult<Option<String>> {
        match self.info_dict()? {
            Some(dict) => dict.get_text(key, self),
            None => Ok(None),
        }
    }

    fn set_info_value(&mut self, key: &str, value: Object) -> PdfResult<()> {
        let info = match self.info_ref {
            Some(info) => info,
            None => {
                let info = self.add_object(Object::Dictionary(Dictionary::new()));
                self.info_ref = Some(info);
                info
            }
        };

        let mut dict = match self.resolve_reference(info)? {
            Object::Dictionary(dict) => dict,
            _ => Dictionary::new(),
        };

        dict.insert(key, value);
        self.replace_object(info, Object::Dictionary(dict));

        Ok(())
    }

    // ------------------------------------------------------------------
    // lazy loading

    fn load_object_at(&mut self, offset: usize, reference: Reference) -> PdfResult<Object> {
        let source = Rc::clone(&self.source);
        let mut reader = ObjectReader {
            doc: self,
            source,
            pos: offset,
            depth: 0,
        };

        let (number, generation) = reader.read_obj_header()?;

        if number != reference.number {
            warn!(
                "object at offset {} numbers itself {}, xref says {}",
                offset, number, reference.number
            );
        }

        if generation != reference.generation {
            warn!(
                "object {} has generation {}, reference asked for {}",
                number, generation, reference.generation
            );
        }

        let obj = reader.lex_object()?;

        if let Err(err) = reader.read_obj_trailer() {
            warn!("object {} is missing endobj: {:#}", number, err);
        }

        Ok(obj)
    }

    /// Intern names and decrypt strings in a freshly loaded object.
    fn normalize(&mut self, reference: Reference, obj: &mut Object) -> PdfResult<()> {
        let skip_decrypt = self
            .encrypt_ref
            .map_or(false, |r| r.number == reference.number);

        let security = if skip_decrypt {
            None
        } else {
            self.security.as_ref()
        };

        normalize_value(obj, security, &mut self.pool, reference)
    }

    /// Eagerly populate every object held in the given /ObjStm container.
    fn expand_object_stream(&mut self, container: usize) -> PdfResult<()> {
        if !self.expanded_containers.insert(container) {
            return Ok(());
        }

        let container_ref = Reference::new(container, 0);
        let obj = self.resolve_reference(container_ref)?;
        let stream = self.assert_stream(obj)?;

        match stream.dict.get_name("Type", self)? {
            Some(name) if name == "ObjStm" => {}
            other => {
                anyhow::bail!(PdfError::Syntax(format!(
                    "object {} is not an object stream, /Type is {:?}",
                    container, other
                )));
            }
        }

        let identity = filter::crypt_identity(&stream.dict, self)?;
        let mut data = stream.data.clone();

        if let Some(handler) = &self.security {
            if !identity {
                data = handler.decrypt(&data, container_ref)?;
            }
        }

        let decoded = filter::decode_stream(&data, &stream.dict, self)?;

        let n = usize::try_from(stream.dict.expect_integer("N", self)?)
            .map_err(|_| PdfError::Syntax("invalid object stream /N".into()))?;
        let first = usize::try_from(stream.dict.expect_integer("First", self)?)
            .map_err(|_| PdfError::Syntax("invalid object stream /First".into()))?;

        if let Some(extends) = stream.dict.get_reference("Extends")? {
            debug!("object stream {} extends {}", container, extends.number);
        }

        for (number, mut value) in object_stream::expand(decoded, n, first)? {
            if self.objects.contains_key(&number) {
                continue;
            }

            // an incremental update may have moved this number elsewhere
            match self.xref.get(number) {
                Some(XrefEntry::Compressed { container: c, .. }) if *c == container => {}
                _ => {
                    debug!(
                        "object {} in container {} is shadowed by a newer entry",
                        number, container
                    );
                    continue;
                }
            }

            // strings inside a container are covered by the container's
            // own encryption, so only interning applies here
            normalize_value(&mut value, None, &mut self.pool, Reference::new(number, 0))?;

            self.objects.insert(
                number,
                Slot {
                    generation: 0,
                    value,
                },
            );
        }

        Ok(())
    }
}

impl Resolve for Document {
    fn resolve_reference(&mut self, reference: Reference) -> PdfResult<Object> {
        if reference.number == 0 {
            return Ok(Object::Null);
        }

        if let Some(slot) = self.objects.get(&reference.number) {
            if slot.generation != reference.generation {
                warn!(
                    "object {} is generation {}, reference asked for {}",
                    reference.number, slot.generation, reference.generation
                );
            }

            return Ok(slot.value.clone());
        }

        if self.load_depth >= MAX_LOAD_DEPTH {
            anyhow::bail!(PdfError::Reference(format!(
                "object {} nests deeper than {} indirections",
                reference.number, MAX_LOAD_DEPTH
            )));
        }

        match self.xref.offset_for(reference)? {
            Some(ByteOffset::MainFile(offset)) => {
                self.load_depth += 1;
                let result = self.load_object_at(offset, reference);
                self.load_depth -= 1;

                let mut obj = result?;
                self.normalize(reference, &mut obj)?;

                self.objects.insert(
                    reference.number,
                    Slot {
                        generation: reference.generation,
                        value: obj.clone(),
                    },
                );

                Ok(obj)
            }
            Some(ByteOffset::ObjectStream { container, .. }) => {
                self.expand_object_stream(container)?;

                Ok(self
                    .objects
                    .get(&reference.number)
                    .map(|slot| slot.value.clone())
                    .unwrap_or(Object::Null))
            }
            None => {
                debug!("reference to missing object {}", reference.number);
                Ok(Object::Null)
            }
        }
    }

    fn reference_exists(&mut self, reference: Reference) -> PdfResult<bool> {
        Ok(self.objects.contains_key(&reference.number)
            || self.xref.offset_for(reference)?.is_some())
    }
}

fn parse_header(buffer: &[u8]) -> PdfResult<String> {
    if buffer.len() >= 8
        && buffer.starts_with(b"%PDF-")
        && matches!(buffer[5], b'1' | b'2')
        && buffer[6] == b'.'
        && buffer[7].is_ascii_digit()
    {
        return Ok(String::from_utf8_lossy(&buffer[5..8]).into_owned());
    }

    Err(PdfError::Syntax("missing or malformed %PDF header".into()).into())
}

fn normalize_value(
    obj: &mut Object,
    security: Option<&SecurityHandler>,
    pool: &mut StringPool,
    reference: Reference,
) -> PdfResult<()> {
    match obj {
        Object::Name(name) => *name = pool.intern_name(name),
        Object::String(bytes) => {
            if let Some(handler) = security {
                let decrypted = handler.decrypt(bytes, reference)?;

                *obj = match date::parse(&decrypted) {
                    Some(seconds) => Object::Date(seconds),
                    None => Object::String(decrypted),
                };
            }
        }
        Object::Binary(bytes) => {
            if let Some(handler) = security {
                *bytes = handler.decrypt(bytes, reference)?;
            }
        }
        Object::Array(items) => {
            for item in items {
                normalize_value(item, security, pool, reference)?;
            }
        }
        Object::Dictionary(dict) => normalize_dict(dict, security, pool, reference)?,
        Object::Stream(stream) => {
            // stream data stays encrypted until the stream is opened
            normalize_dict(&mut stream.dict, security, pool, reference)?;
        }
        _ => {}
    }

    Ok(())
}

fn normalize_dict(
    dict: &mut Dictionary,
    security: Option<&SecurityHandler>,
    pool: &mut StringPool,
    reference: Reference,
) -> PdfResult<()> {
    dict.intern_keys(pool);

    for (_, value) in dict.iter_mut() {
        normalize_value(value, security, pool, reference)?;
    }

    Ok(())
}

/// Lexer bound to the document's source buffer; resolves /Length and other
/// indirect values through the document while lexing.
struct ObjectReader<'a> {
    doc: &'a mut Document,
    source: Rc<Vec<u8>>,
    pos: usize,
    depth: usize,
}

impl LexBase for ObjectReader<'_> {
    fn buffer(&self) -> &[u8] {
        &self.source
    }

    fn cursor(&self) -> usize {
        self.pos
    }

    fn cursor_mut(&mut self) -> &mut usize {
        &mut self.pos
    }
}

impl LexObject for ObjectReader<'_> {
    fn depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    fn lex_dict(&mut self) -> PdfResult<Object> {
        let dict = self.lex_dict_body()?;

        if self.next_matches(b"stream") {
            return Ok(Object::Stream(self.lex_stream(dict)?));
        }

        Ok(Object::Dictionary(dict))
    }
}

impl ObjectReader<'_> {
    fn lex_stream(&mut self, dict: Dictionary) -> PdfResult<Stream> {
        self.expect_bytes(b"stream")?;
        self.expect_eol()?;

        let start = self.cursor();
        let length = dict
            .get_integer("Length", &mut *self.doc)?
            .and_then(|len| usize::try_from(len).ok());

        let mut data = None;

        // trust /Length when endstream actually follows the span
        if let Some(len) = length {
            if start + len <= self.source.len() {
                *self.cursor_mut() = start + len;
                self.skip_whitespace();

                if self.next_matches(b"endstream") {
                    data = Some(self.source[start..start + len].to_vec());
                }
            }
        }

        // otherwise fall back to scanning for endstream
        if data.is_none() {
            let idx = self.source[start..]
                .windows(b"endstream".len())
                .position(|window| window == b"endstream")
                .ok_or_else(|| PdfError::Syntax("unterminated stream".into()))?;

            let mut end = start + idx;

            if end > start && self.source[end - 1] == b'\n' {
                end -= 1;
            }
            if end > start && self.source[end - 1] == b'\r' {
                end -= 1;
            }

            warn!(
                "stream at offset {} has a bad /Length, recovered {} bytes by scanning",
                start,
                end - start
            );

            data = Some(self.source[start..end].to_vec());
            *self.cursor_mut() = start + idx;
        }

        self.expect_bytes(b"endstream")?;

        Ok(Stream {
            dict,
            data: data.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod test {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::filter::{FlateParams, PredictorKind};

    /// Surface `log` output when a test runs under `RUST_LOG`.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Assemble a classic-xref PDF from object bodies, numbering them
    /// from 1.
    fn assemble(objects: &[&str], trailer_body: &str) -> Vec<u8> {
        let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::new();

        for (idx, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend(format!("{} 0 obj\n{}\nendobj\n", idx + 1, body).into_bytes());
        }

        let start = out.len();
        out.extend(format!("xref\n0 {}\n", objects.len() + 1).into_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");

        for offset in &offsets {
            out.extend(format!("{:010} 00000 n \n", offset).into_bytes());
        }

        out.extend(
            format!(
                "trailer\n<< /Size {} {} >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                trailer_body,
                start
            )
            .into_bytes(),
        );

        out
    }

    fn one_page_pdf() -> Vec<u8> {
        assemble(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
                "<< /Title (Hello) /CreationDate (D:20240101120000Z) >>",
            ],
            "/Root 1 0 R /Info 4 0 R",
        )
    }

    #[test]
    fn read_info_and_dates() {
        init_logging();

        let mut doc = Document::from_bytes(one_page_pdf(), OpenOptions::new()).unwrap();

        assert_eq!(doc.version(), "1.7");
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.title().unwrap().as_deref(), Some("Hello"));
        assert_eq!(doc.creation_date().unwrap(), Some(1_704_110_400));
        assert_eq!(
            doc.page_media_box(0).unwrap(),
            Some([0.0, 0.0, 612.0, 792.0])
        );
    }

    #[test]
    fn names_are_interned_per_document() {
        let mut doc = Document::from_bytes(one_page_pdf(), OpenOptions::new()).unwrap();

        let catalog = doc.catalog().unwrap();
        let page = doc.page_dict(0).unwrap();

        let (catalog_key, _) = catalog.iter().find(|(k, _)| **k == "Type").unwrap();
        let (page_key, _) = page.iter().find(|(k, _)| **k == "Type").unwrap();

        assert!(Rc::ptr_eq(catalog_key.as_rc(), page_key.as_rc()));
        assert!(doc.pool_len() > 0);
    }

    fn saved(doc: &mut Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn created_doc(pages: usize, media_box: Option<[f64; 4]>) -> Document {
        let mut doc = Document::create();

        if let Some(media_box) = media_box {
            doc.set_media_box(media_box);
        }

        for _ in 0..pages {
            doc.append_page(Dictionary::new()).unwrap();
        }

        doc
    }

    #[test]
    fn create_save_reopen() {
        let mut doc = created_doc(2, None);
        doc.set_title("Created").unwrap();
        doc.set_creation_date(1_704_110_400).unwrap();

        let bytes = saved(&mut doc);

        let mut reopened = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        assert_eq!(reopened.page_count(), 2);
        assert_eq!(reopened.title().unwrap().as_deref(), Some("Created"));
        assert_eq!(reopened.creation_date().unwrap(), Some(1_704_110_400));
        assert_eq!(
            reopened.page_media_box(0).unwrap(),
            Some([0.0, 0.0, 612.0, 792.0])
        );
    }

    #[test]
    fn merge_two_documents() {
        init_logging();

        let letter = saved(&mut created_doc(2, None));
        let a4 = saved(&mut created_doc(3, Some([0.0, 0.0, 595.0, 842.0])));

        let mut first = Document::from_bytes(letter, OpenOptions::new()).unwrap();
        let mut second = Document::from_bytes(a4, OpenOptions::new()).unwrap();

        let mut merged = Document::create();

        for idx in 0..first.page_count() {
            merged.copy_page(&mut first, idx).unwrap();
        }
        for idx in 0..second.page_count() {
            merged.copy_page(&mut second, idx).unwrap();
        }

        let bytes = saved(&mut merged);
        let mut reopened = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        assert_eq!(reopened.page_count(), 5);

        // page 3 of the merge is page 1 of the second input
        let expected = second.page_media_box(0).unwrap();
        assert_eq!(reopened.page_media_box(2).unwrap(), expected);
        assert_eq!(expected, Some([0.0, 0.0, 595.0, 842.0]));

        // pages from the first input keep their own geometry
        assert_eq!(
            reopened.page_media_box(0).unwrap(),
            Some([0.0, 0.0, 612.0, 792.0])
        );
    }

    #[test]
    fn copying_shared_objects_dedupes() {
        let mut src = created_doc(2, None);

        let shared = src.add_object(Object::string("shared resource"));
        for idx in 0..2 {
            let mut page = src.page_dict(idx).unwrap();
            page.insert("SharedRes", Object::Reference(shared));
            let page_ref = src.page(idx).unwrap();
            src.replace_object(page_ref, Object::Dictionary(page));
        }

        let bytes = saved(&mut src);
        let mut src = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        let mut dest = Document::create();
        dest.copy_page(&mut src, 0).unwrap();
        dest.copy_page(&mut src, 1).unwrap();

        let first = dest.page_dict(0).unwrap().expect_reference("SharedRes").unwrap();
        let second = dest.page_dict(1).unwrap().expect_reference("SharedRes").unwrap();

        assert_eq!(first, second);
    }

    /// Hand-build a file whose xref is a cross-reference stream with
    /// /W [1 3 1], holding three uncompressed objects plus the stream
    /// itself.
    fn xref_stream_pdf() -> Vec<u8> {
        let mut out = b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 400] >>",
        ];

        let mut offsets = Vec::new();

        for (idx, body) in bodies.iter().enumerate() {
            offsets.push(out.len());
            out.extend(format!("{} 0 obj\n{}\nendobj\n", idx + 1, body).into_bytes());
        }

        let xref_offset = out.len();

        let mut rows = Vec::new();
        rows.extend_from_slice(&[0, 0, 0, 0, 255]);
        for offset in &offsets {
            rows.push(1);
            rows.extend_from_slice(&(*offset as u32).to_be_bytes()[1..]);
            rows.push(0);
        }
        rows.push(1);
        rows.extend_from_slice(&(xref_offset as u32).to_be_bytes()[1..]);
        rows.push(0);

        out.extend(
            format!(
                "4 0 obj\n<< /Type /XRef /Size 5 /W [1 3 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .into_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        out.extend(format!("startxref\n{}\n%%EOF\n", xref_offset).into_bytes());

        out
    }

    #[test]
    fn xref_stream_survives_a_rewrite() {
        init_logging();

        let mut doc = Document::from_bytes(xref_stream_pdf(), OpenOptions::new()).unwrap();
        assert_eq!(doc.page_count(), 1);

        let bytes = saved(&mut doc);
        let mut reopened = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        assert_eq!(reopened.page_count(), doc.page_count());
        assert_eq!(
            reopened.page_media_box(0).unwrap(),
            Some([0.0, 0.0, 300.0, 400.0])
        );

        let catalog = reopened.catalog().unwrap();
        assert_eq!(catalog.get("Type"), Some(&Object::name("Catalog")));
    }

    /// Object streams: three objects compressed into one container,
    /// indexed by a cross-reference stream.
    fn object_stream_pdf() -> Vec<u8> {
        let mut out = b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n".to_vec();

        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ];

        let mut payload = Vec::new();
        let mut pairs = String::new();

        for (idx, body) in bodies.iter().enumerate() {
            pairs.push_str(&format!("{} {} ", idx + 1, payload.len()));
            payload.extend_from_slice(body.as_bytes());
            payload.push(b' ');
        }

        let first = pairs.len();
        let mut stream_data = pairs.into_bytes();
        stream_data.extend_from_slice(&payload);

        let container_offset = out.len();
        out.extend(
            format!(
                "4 0 obj\n<< /Type /ObjStm /N 3 /First {} /Length {} >>\nstream\n",
                first,
                stream_data.len()
            )
            .into_bytes(),
        );
        out.extend_from_slice(&stream_data);
        out.extend_from_slice(b"\nendstream\nendobj\n");

        let xref_offset = out.len();

        let mut rows = Vec::new();
        rows.extend_from_slice(&[0, 0, 0, 0, 255]);
        for idx in 0..3u8 {
            rows.push(2);
            rows.extend_from_slice(&[0, 0, 4]);
            rows.push(idx);
        }
        rows.push(1);
        rows.extend_from_slice(&(container_offset as u32).to_be_bytes()[1..]);
        rows.push(0);
        rows.push(1);
        rows.extend_from_slice(&(xref_offset as u32).to_be_bytes()[1..]);
        rows.push(0);

        out.extend(
            format!(
                "5 0 obj\n<< /Type /XRef /Size 6 /W [1 3 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .into_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        out.extend(format!("startxref\n{}\n%%EOF\n", xref_offset).into_bytes());

        out
    }

    #[test]
    fn object_stream_expansion() {
        init_logging();

        let mut doc = Document::from_bytes(object_stream_pdf(), OpenOptions::new()).unwrap();

        assert_eq!(doc.page_count(), 1);
        assert_eq!(
            doc.page_media_box(0).unwrap(),
            Some([0.0, 0.0, 612.0, 792.0])
        );

        // the container populated exactly its advertised objects
        for number in [1, 2, 3] {
            assert!(
                doc.loaded_object_numbers().contains(&number),
                "object {} missing",
                number
            );
        }
    }

    #[test]
    fn streams_round_trip_through_save() {
        let mut doc = created_doc(1, None);

        let contents = {
            let mut stream = doc
                .create_stream(Dictionary::new(), StreamFilter::flate())
                .unwrap();
            stream.puts("BT /F1 12 Tf 72 720 Td (body text) Tj ET\n");
            stream.finish().unwrap()
        };

        let mut page = doc.page_dict(0).unwrap();
        page.insert("Contents", Object::Reference(contents));
        let page_ref = doc.page(0).unwrap();
        doc.replace_object(page_ref, Object::Dictionary(page));

        let bytes = saved(&mut doc);
        let mut reopened = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        let contents = reopened
            .page_dict(0)
            .unwrap()
            .expect_reference("Contents")
            .unwrap();
        let reader = reopened.open_stream(contents).unwrap();

        assert_eq!(reader.bytes(), b"BT /F1 12 Tf 72 720 Td (body text) Tj ET\n");
    }

    #[test]
    fn auto_predictor_image_round_trip() {
        let (width, height) = (256usize, 256usize);
        let mut image = Vec::with_capacity(width * height * 3);

        for y in 0..height {
            for x in 0..width {
                image.push(x as u8);
                image.push(y as u8);
                image.push(((x + y) / 2) as u8);
            }
        }

        let mut doc = created_doc(1, None);

        let image_ref = {
            let mut dict = Dictionary::new();
            dict.insert("Subtype", Object::name("Image"));
            dict.insert("Width", width as i64);
            dict.insert("Height", height as i64);

            let mut stream = doc
                .create_stream(
                    dict,
                    StreamFilter::Flate(FlateParams {
                        predictor: Some(PredictorKind::Auto),
                        colors: 3,
                        bits_per_component: 8,
                        columns: width,
                    }),
                )
                .unwrap();
            std::io::Write::write_all(&mut stream, &image).unwrap();
            stream.finish().unwrap()
        };

        let bytes = saved(&mut doc);
        let mut reopened = Document::from_bytes(bytes, OpenOptions::new()).unwrap();

        let reader = reopened.open_stream(image_ref).unwrap();
        assert_eq!(reader.bytes(), image);
    }

    #[test]
    fn aes_256_save_and_reopen() {
        init_logging();

        let mut doc = created_doc(1, None);
        doc.set_title("Encrypted Title").unwrap();
        doc.set_encryption(
            EncryptionMode::Aes256,
            "test",
            "owner secret",
            Permissions::default(),
        )
        .unwrap();

        let bytes = saved(&mut doc);

        let mut reopened =
            Document::from_bytes(bytes.clone(), OpenOptions::new().password("test")).unwrap();

        assert!(reopened.is_encrypted());
        assert_eq!(reopened.encryption_mode(), Some(EncryptionMode::Aes256));
        assert_eq!(reopened.title().unwrap().as_deref(), Some("Encrypted Title"));
        assert_eq!(reopened.page_count(), 1);

        let err = Document::from_bytes(bytes, OpenOptions::new().password("nope")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PdfError>(),
            Some(PdfError::Crypto(..))
        ));
    }

    #[test]
    fn every_encryption_mode_round_trips_a_document() {
        for mode in [
            EncryptionMode::Rc4_40,
            EncryptionMode::Rc4_128,
            EncryptionMode::Aes128,
            EncryptionMode::Aes256,
        ] {
            let mut doc = created_doc(1, None);
            doc.set_title("Locked").unwrap();
            doc.set_encryption(mode, "pw", "", Permissions::default())
                .unwrap();

            let bytes = saved(&mut doc);
            let mut reopened =
                Document::from_bytes(bytes, OpenOptions::new().password("pw")).unwrap();

            assert_eq!(
                reopened.title().unwrap().as_deref(),
                Some("Locked"),
                "{:?}",
                mode
            );
        }
    }

    #[test]
    fn encrypted_stream_contents_round_trip() {
        let mut doc = created_doc(1, None);
        doc.set_encryption(
            EncryptionMode::Aes128,
            "pw",
            "",
            Permissions::default(),
        )
        .unwrap();

        let contents = {
            let mut stream = doc
                .create_stream(Dictionary::new(), StreamFilter::flate())
                .unwrap();
            stream.puts("0.5 g 10 10 100 100 re f\n");
            stream.finish().unwrap()
        };

        let bytes = saved(&mut doc);
        let mut reopened =
            Document::from_bytes(bytes, OpenOptions::new().password("pw")).unwrap();

        let reader = reopened.open_stream(contents).unwrap();
        assert_eq!(reader.bytes(), b"0.5 g 10 10 100 100 re f\n");
    }

    #[test]
    fn bad_startxref_reports_once_and_fails() {
        init_logging();

        let calls = Rc::new(Cell::new(0usize));
        let seen = Rc::clone(&calls);

        let err = Document::from_bytes(
            b"%PDF-1.4\n1 0 obj\nnull\nendobj\nstartxref\n0\n%%EOF\n".to_vec(),
            OpenOptions::new().error_hook(move |_| {
                seen.set(seen.get() + 1);
                true
            }),
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PdfError>(),
            Some(PdfError::Syntax(..))
        ));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn missing_header_is_a_syntax_error() {
        let err =
            Document::from_bytes(b"not a pdf at all".to_vec(), OpenOptions::new()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PdfError>(),
            Some(PdfError::Syntax(..))
        ));
    }

    #[test]
    fn write_operations_require_write_mode() {
        let mut doc = Document::from_bytes(one_page_pdf(), OpenOptions::new()).unwrap();

        let err = doc.append_page(Dictionary::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PdfError>(),
            Some(PdfError::State(..))
        ));
    }

    #[test]
    fn dangling_references_resolve_to_null() {
        let mut doc = Document::from_bytes(one_page_pdf(), OpenOptions::new()).unwrap();

        assert_eq!(
            doc.resolve_reference(Reference::new(99, 0)).unwrap(),
            Object::Null
        );
    }
}
