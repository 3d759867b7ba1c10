use crate::{
    error::{PdfError, PdfResult},
    objects::{Dictionary, Object, Reference},
    resolve::{NoResolve, Resolve},
};

/// The trailer dictionary, either from a classic `trailer` or from a
/// cross-reference stream's dictionary.
#[derive(Debug, Clone, Default)]
pub(crate) struct Trailer {
    pub size: usize,
    /// Offset of the previous cross-reference section.
    pub prev: Option<usize>,
    /// Offset of the cross-reference stream in a hybrid-reference file.
    pub xref_stm: Option<usize>,
    /// Required in the newest section, absent in earlier ones.
    pub root: Option<Reference>,
    /// Reference or inline dictionary; resolved by the document.
    pub encrypt: Option<Object>,
    pub info: Option<Reference>,
    pub id: Option<(Vec<u8>, Vec<u8>)>,
}

impl Trailer {
    /// Trailer values that matter here are direct or plain references, so
    /// no object table is needed to read them.
    pub fn from_dict(dict: &Dictionary) -> PdfResult<Self> {
        let size = dict
            .get_integer("Size", &mut NoResolve)?
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| PdfError::Syntax("trailer is missing a valid /Size".into()))?;

        let prev = dict
            .get_integer("Prev", &mut NoResolve)?
            .and_then(|prev| usize::try_from(prev).ok());
        let xref_stm = dict
            .get_integer("XRefStm", &mut NoResolve)?
            .and_then(|offset| usize::try_from(offset).ok());

        let root = match dict.get("Root") {
            Some(Object::Reference(r)) => Some(*r),
            Some(obj) => {
                anyhow::bail!(PdfError::Reference(format!(
                    "/Root must be a reference, found {}",
                    obj.kind()
                )));
            }
            None => None,
        };

        let info = match dict.get("Info") {
            Some(Object::Reference(r)) => Some(*r),
            _ => None,
        };

        let encrypt = dict.get("Encrypt").cloned();
        let id = Self::parse_id(dict)?;

        Ok(Trailer {
            size,
            prev,
            xref_stm,
            root,
            encrypt,
            info,
            id,
        })
    }

    /// /ID holds two byte strings; they shall be direct objects.
    fn parse_id(dict: &Dictionary) -> PdfResult<Option<(Vec<u8>, Vec<u8>)>> {
        let arr = match dict.get_arr("ID", &mut NoResolve)? {
            Some(arr) => arr,
            None => return Ok(None),
        };

        if arr.len() != 2 {
            log::warn!("/ID with {} entries, expected 2", arr.len());
            return Ok(None);
        }

        let mut parts = arr.into_iter().map(|obj| NoResolve.assert_string(obj));

        let first = parts.next().unwrap()?;
        let second = parts.next().unwrap()?;

        Ok(Some((first, second)))
    }

    /// Fold an earlier section's trailer into this one. The newest value
    /// of each field wins.
    pub fn merge_previous(&mut self, previous: Trailer) {
        if self.root.is_none() {
            self.root = previous.root;
        }
        if self.info.is_none() {
            self.info = previous.info;
        }
        if self.encrypt.is_none() {
            self.encrypt = previous.encrypt;
        }
        if self.id.is_none() {
            self.id = previous.id;
        }
    }
}
