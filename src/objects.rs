use std::{fmt, rc::Rc};

use crate::{
    date,
    error::{PdfError, PdfResult},
    resolve::Resolve,
};

/// An interned PDF name.
///
/// Names compare by contents; two names interned through the same
/// [`crate::string_pool::StringPool`] additionally share their backing
/// allocation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Rc<str>);

impl Name {
    pub fn new(s: &str) -> Self {
        Self(Rc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_rc(rc: Rc<str>) -> Self {
        Self(rc)
    }

    pub(crate) fn as_rc(&self) -> &Rc<str> {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(Rc::from(s))
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to an indirect object, spelled `N G R` in the file.
///
/// A reference to a non-existing object resolves to `null`.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    pub number: usize,
    pub generation: u16,
}

impl Reference {
    pub fn new(number: usize, generation: u16) -> Self {
        Self { number, generation }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    /// Integers and reals share one representation; the writer picks the
    /// shortest faithful spelling.
    Number(f64),
    /// Literal string. Bytes are preserved as read, 8-bit clean.
    String(Vec<u8>),
    /// Hex-string payload.
    Binary(Vec<u8>),
    Name(Name),
    /// Seconds since the Unix epoch. Literal strings of the form `D:…`
    /// parse to this kind.
    Date(i64),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(Reference),
}

impl Object {
    /// Short tag used in error messages.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(..) => "boolean",
            Object::Number(..) => "number",
            Object::String(..) => "string",
            Object::Binary(..) => "binary string",
            Object::Name(..) => "name",
            Object::Date(..) => "date",
            Object::Array(..) => "array",
            Object::Dictionary(..) => "dictionary",
            Object::Stream(..) => "stream",
            Object::Reference(..) => "reference",
        }
    }

    pub fn integer(n: i64) -> Object {
        Object::Number(n as f64)
    }

    pub fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec())
    }

    pub fn name(s: &str) -> Object {
        Object::Name(Name::new(s))
    }
}

impl From<f64> for Object {
    fn from(n: f64) -> Self {
        Object::Number(n)
    }
}

impl From<i64> for Object {
    fn from(n: i64) -> Self {
        Object::integer(n)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

impl From<Name> for Object {
    fn from(name: Name) -> Self {
        Object::Name(name)
    }
}

impl From<Reference> for Object {
    fn from(r: Reference) -> Self {
        Object::Reference(r)
    }
}

/// A stream object: its dictionary plus the still-encoded bytes.
#[derive(Clone, PartialEq)]
pub struct Stream {
    pub dict: Dictionary,
    pub data: Vec<u8>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("dict", &self.dict)
            .field("data", &format!("[ {} bytes ]", self.data.len()))
            .finish()
    }
}

/// An insertion-ordered dictionary.
///
/// PDF dictionaries are small and their iteration order is observable on
/// write, so entries live in a plain vector. `insert` replaces an existing
/// key in place, which both forbids duplicates on write and gives the
/// last-wins behavior for duplicate keys in source files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: Vec<(Name, Object)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Name>, value: impl Into<Object>) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Object> {
        let idx = self.entries.iter().position(|(name, _)| name == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Object)> {
        self.entries.iter().map(|(name, value)| (name, value))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&Name, &mut Object)> {
        self.entries.iter_mut().map(|(name, value)| (&*name, value))
    }

    /// Re-key every entry through the document's string pool.
    pub(crate) fn intern_keys(&mut self, pool: &mut crate::string_pool::StringPool) {
        for (name, _) in &mut self.entries {
            *name = pool.intern_name(name);
        }
    }

    fn resolved(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Object>> {
        match self.get(key) {
            Some(obj) => {
                let obj = resolver.resolve(obj.clone())?;
                Ok(match obj {
                    Object::Null => None,
                    obj => Some(obj),
                })
            }
            None => Ok(None),
        }
    }

    pub fn get_number(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<f64>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_number(obj))
            .transpose()
    }

    pub fn get_integer(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<i64>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_integer(obj))
            .transpose()
    }

    pub fn get_bool(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<bool>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_bool(obj))
            .transpose()
    }

    pub fn get_name(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Name>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_name(obj))
            .transpose()
    }

    pub fn get_string(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Vec<u8>>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_string(obj))
            .transpose()
    }

    /// String value decoded as UTF-8, lossily.
    pub fn get_text(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<String>> {
        Ok(self
            .get_string(key, resolver)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn get_date(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<i64>> {
        Ok(match self.resolved(key, resolver)? {
            Some(Object::Date(seconds)) => Some(seconds),
            Some(Object::String(bytes)) | Some(Object::Binary(bytes)) => date::parse(&bytes),
            Some(..) | None => None,
        })
    }

    pub fn get_dict(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Dictionary>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_dict(obj))
            .transpose()
    }

    pub fn get_arr(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Vec<Object>>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_arr(obj))
            .transpose()
    }

    pub fn get_stream(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Option<Stream>> {
        self.resolved(key, resolver)?
            .map(|obj| resolver.assert_stream(obj))
            .transpose()
    }

    /// The reference itself, unresolved.
    pub fn get_reference(&self, key: &str) -> PdfResult<Option<Reference>> {
        match self.get(key) {
            Some(Object::Reference(r)) => Ok(Some(*r)),
            Some(obj) => Err(PdfError::Reference(format!(
                "expected reference for /{}, found {}",
                key,
                obj.kind()
            ))
            .into()),
            None => Ok(None),
        }
    }

    pub fn expect_integer(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<i64> {
        self.get_integer(key, resolver)?
            .ok_or_else(|| missing_key(key))
    }

    pub fn expect_number(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<f64> {
        self.get_number(key, resolver)?
            .ok_or_else(|| missing_key(key))
    }

    pub fn expect_name(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Name> {
        self.get_name(key, resolver)?.ok_or_else(|| missing_key(key))
    }

    pub fn expect_dict(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Dictionary> {
        self.get_dict(key, resolver)?.ok_or_else(|| missing_key(key))
    }

    pub fn expect_arr(&self, key: &str, resolver: &mut dyn Resolve) -> PdfResult<Vec<Object>> {
        self.get_arr(key, resolver)?.ok_or_else(|| missing_key(key))
    }

    pub fn expect_reference(&self, key: &str) -> PdfResult<Reference> {
        self.get_reference(key)?.ok_or_else(|| missing_key(key))
    }
}

fn missing_key(key: &str) -> anyhow::Error {
    PdfError::Syntax(format!("missing required key /{}", key)).into()
}
