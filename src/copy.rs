use crate::{
    document::Document,
    error::PdfResult,
    objects::{Dictionary, Object, Reference},
    resolve::Resolve,
};

/// Deep-copy a value from `src` into `dest`.
///
/// Scalars copy bitwise, names re-intern in the destination pool, buffers
/// are duplicated, and indirect references go through the object map so
/// shared targets copy once and reference cycles terminate.
pub(crate) fn copy_value(
    dest: &mut Document,
    src: &mut Document,
    obj: &Object,
) -> PdfResult<Object> {
    Ok(match obj {
        Object::Null => Object::Null,
        Object::Boolean(b) => Object::Boolean(*b),
        Object::Number(n) => Object::Number(*n),
        Object::Date(seconds) => Object::Date(*seconds),
        Object::String(bytes) => Object::String(bytes.clone()),
        Object::Binary(bytes) => Object::Binary(bytes.clone()),
        Object::Name(name) => Object::Name(dest.intern(name)),
        Object::Array(items) => {
            let mut copied = Vec::with_capacity(items.len());

            for item in items {
                copied.push(copy_value(dest, src, item)?);
            }

            Object::Array(copied)
        }
        Object::Dictionary(dict) => Object::Dictionary(copy_dict(dest, src, dict)?),
        Object::Stream(stream) => Object::Stream(crate::objects::Stream {
            dict: copy_dict(dest, src, &stream.dict)?,
            data: stream.data.clone(),
        }),
        Object::Reference(r) => Object::Reference(copy_indirect(dest, src, *r)?),
    })
}

fn copy_dict(
    dest: &mut Document,
    src: &mut Document,
    dict: &Dictionary,
) -> PdfResult<Dictionary> {
    let mut copied = Dictionary::new();

    for (name, value) in dict.iter() {
        let name = dest.intern(name);
        let value = copy_value(dest, src, value)?;

        copied.insert(name, value);
    }

    Ok(copied)
}

/// Copy the object behind a reference, consulting the object map first.
///
/// The destination number is reserved and mapped before the target's value
/// is copied, which is what terminates cycles through the page tree.
pub(crate) fn copy_indirect(
    dest: &mut Document,
    src: &mut Document,
    reference: Reference,
) -> PdfResult<Reference> {
    if let Some(mapped) = dest.copied_object(src.id, reference.number) {
        return Ok(mapped);
    }

    let target = src.resolve_reference(reference)?;

    let dest_ref = dest.add_object(Object::Null);
    dest.map_copied_object(src.id, reference.number, dest_ref);

    let copied = copy_value(dest, src, &target)?;
    dest.replace_object(dest_ref, copied);

    Ok(dest_ref)
}
