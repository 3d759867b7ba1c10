use crate::{
    error::{PdfError, PdfResult},
    objects::{Dictionary, Name, Object, Reference, Stream},
};

/// How far a chain of indirect references is followed before the chain is
/// declared circular.
const MAX_REFERENCE_CHAIN: usize = 32;

/// Resolution of indirect references plus the typed coercions built on it.
///
/// Implemented by the document (real resolution against the object table)
/// and by standalone lexers that have no object table to consult.
pub trait Resolve {
    fn resolve_reference(&mut self, reference: Reference) -> PdfResult<Object>;

    /// Whether the reference points to an existing object.
    fn reference_exists(&mut self, reference: Reference) -> PdfResult<bool>;

    /// Follow references until a direct object is reached.
    fn resolve(&mut self, obj: Object) -> PdfResult<Object> {
        let mut obj = obj;

        for _ in 0..MAX_REFERENCE_CHAIN {
            match obj {
                Object::Reference(r) => obj = self.resolve_reference(r)?,
                obj => return Ok(obj),
            }
        }

        Err(PdfError::Reference("circular chain of indirect references".into()).into())
    }

    fn assert_number(&mut self, obj: Object) -> PdfResult<f64> {
        match self.resolve(obj)? {
            Object::Number(n) => Ok(n),
            obj => Err(mismatch("number", &obj)),
        }
    }

    fn assert_integer(&mut self, obj: Object) -> PdfResult<i64> {
        let n = self.assert_number(obj)?;

        if n.fract() != 0.0 {
            anyhow::bail!(PdfError::Syntax(format!("expected integer, found {}", n)));
        }

        Ok(n as i64)
    }

    fn assert_unsigned_integer(&mut self, obj: Object) -> PdfResult<u64> {
        let n = self.assert_integer(obj)?;

        u64::try_from(n)
            .map_err(|_| PdfError::Syntax(format!("expected unsigned integer, found {}", n)).into())
    }

    fn assert_bool(&mut self, obj: Object) -> PdfResult<bool> {
        match self.resolve(obj)? {
            Object::Boolean(b) => Ok(b),
            obj => Err(mismatch("boolean", &obj)),
        }
    }

    fn assert_name(&mut self, obj: Object) -> PdfResult<Name> {
        match self.resolve(obj)? {
            Object::Name(name) => Ok(name),
            obj => Err(mismatch("name", &obj)),
        }
    }

    /// Literal and hex strings are interchangeable byte strings.
    fn assert_string(&mut self, obj: Object) -> PdfResult<Vec<u8>> {
        match self.resolve(obj)? {
            Object::String(bytes) | Object::Binary(bytes) => Ok(bytes),
            Object::Date(seconds) => Ok(crate::date::format(seconds).into_bytes()),
            obj => Err(mismatch("string", &obj)),
        }
    }

    fn assert_dict(&mut self, obj: Object) -> PdfResult<Dictionary> {
        match self.resolve(obj)? {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream(stream) => Ok(stream.dict),
            obj => Err(mismatch("dictionary", &obj)),
        }
    }

    fn assert_arr(&mut self, obj: Object) -> PdfResult<Vec<Object>> {
        match self.resolve(obj)? {
            Object::Array(arr) => Ok(arr),
            obj => Err(mismatch("array", &obj)),
        }
    }

    fn assert_stream(&mut self, obj: Object) -> PdfResult<Stream> {
        match self.resolve(obj)? {
            Object::Stream(stream) => Ok(stream),
            obj => Err(mismatch("stream", &obj)),
        }
    }
}

fn mismatch(expected: &str, found: &Object) -> anyhow::Error {
    PdfError::Syntax(format!("expected {}, found {}", expected, found.kind())).into()
}

/// Resolver for contexts without an object table. References resolve to
/// `null`, matching how a dangling reference reads.
pub(crate) struct NoResolve;

impl Resolve for NoResolve {
    fn resolve_reference(&mut self, _reference: Reference) -> PdfResult<Object> {
        Ok(Object::Null)
    }

    fn reference_exists(&mut self, _reference: Reference) -> PdfResult<bool> {
        Ok(false)
    }
}
