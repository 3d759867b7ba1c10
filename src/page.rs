use std::collections::HashSet;

use log::warn;

use crate::{
    error::{PdfError, PdfResult},
    objects::{Object, Reference},
    resolve::Resolve,
};

/// Depth limit for both the /Kids descent and the /Parent walk.
pub(crate) const MAX_TREE_DEPTH: usize = 32;

/// Walk the page tree under `root` and return its leaf pages in reading
/// order.
pub(crate) fn flatten_page_tree(
    resolver: &mut dyn Resolve,
    root: Reference,
) -> PdfResult<Vec<Reference>> {
    let mut pages = Vec::new();
    let mut visited = HashSet::new();

    walk(resolver, root, 0, &mut pages, &mut visited)?;

    Ok(pages)
}

fn walk(
    resolver: &mut dyn Resolve,
    node: Reference,
    depth: usize,
    pages: &mut Vec<Reference>,
    visited: &mut HashSet<usize>,
) -> PdfResult<()> {
    if depth > MAX_TREE_DEPTH {
        anyhow::bail!(PdfError::Syntax("page tree nested too deeply".into()));
    }

    if !visited.insert(node.number) {
        warn!("page tree cycle through object {}", node.number);
        return Ok(());
    }

    let dict = resolver.assert_dict(Object::Reference(node))?;
    let node_type = dict.get_name("Type", resolver)?;

    match node_type.as_ref().map(|name| name.as_str()) {
        Some("Page") => pages.push(node),
        Some("Pages") | None => {
            // an intermediate node; a missing /Type is tolerated when
            // /Kids makes the intent clear
            let kids = match dict.get_arr("Kids", resolver)? {
                Some(kids) => kids,
                None if node_type.is_none() => {
                    anyhow::bail!(PdfError::Syntax(format!(
                        "page tree node {} has neither /Type nor /Kids",
                        node.number
                    )));
                }
                None => Vec::new(),
            };

            for kid in kids {
                let kid = match kid {
                    Object::Reference(r) => r,
                    obj => {
                        anyhow::bail!(PdfError::Syntax(format!(
                            "/Kids entries must be references, found {}",
                            obj.kind()
                        )));
                    }
                };

                walk(resolver, kid, depth + 1, pages, visited)?;
            }
        }
        Some(other) => {
            anyhow::bail!(PdfError::Syntax(format!(
                "expected /Page or /Pages node, found /{}",
                other
            )));
        }
    }

    Ok(())
}

/// Look up an attribute on a page, consulting ancestors through /Parent
/// for the inheritable ones (/MediaBox, /CropBox, /Resources, /Rotate).
pub(crate) fn inherited_attribute(
    resolver: &mut dyn Resolve,
    page: Reference,
    key: &str,
) -> PdfResult<Option<Object>> {
    let mut node = Some(page);

    for _ in 0..=MAX_TREE_DEPTH {
        let reference = match node {
            Some(reference) => reference,
            None => return Ok(None),
        };

        let dict = resolver.assert_dict(Object::Reference(reference))?;

        if let Some(value) = dict.get(key) {
            return Ok(Some(resolver.resolve(value.clone())?));
        }

        node = match dict.get("Parent") {
            Some(Object::Reference(parent)) => Some(*parent),
            _ => None,
        };
    }

    warn!("/Parent chain deeper than {} nodes", MAX_TREE_DEPTH);

    Ok(None)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::objects::Dictionary;

    struct TestResolver {
        objects: HashMap<usize, Object>,
    }

    impl Resolve for TestResolver {
        fn resolve_reference(&mut self, reference: Reference) -> PdfResult<Object> {
            Ok(self
                .objects
                .get(&reference.number)
                .cloned()
                .unwrap_or(Object::Null))
        }

        fn reference_exists(&mut self, reference: Reference) -> PdfResult<bool> {
            Ok(self.objects.contains_key(&reference.number))
        }
    }

    fn page(parent: usize) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type", Object::name("Page"));
        dict.insert("Parent", Object::Reference(Reference::new(parent, 0)));
        Object::Dictionary(dict)
    }

    fn pages(kids: &[usize]) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type", Object::name("Pages"));
        dict.insert(
            "Kids",
            Object::Array(
                kids.iter()
                    .map(|&n| Object::Reference(Reference::new(n, 0)))
                    .collect(),
            ),
        );
        dict.insert("Count", kids.len() as i64);
        Object::Dictionary(dict)
    }

    #[test]
    fn flattens_nested_nodes_in_order() {
        let mut resolver = TestResolver {
            objects: HashMap::from([
                (1, pages(&[2, 3])),
                (2, pages(&[4, 5])),
                (3, page(1)),
                (4, page(2)),
                (5, page(2)),
            ]),
        };

        let flattened = flatten_page_tree(&mut resolver, Reference::new(1, 0)).unwrap();

        let numbers: Vec<usize> = flattened.iter().map(|r| r.number).collect();
        assert_eq!(numbers, [4, 5, 3]);
    }

    #[test]
    fn cycles_do_not_hang() {
        let mut resolver = TestResolver {
            objects: HashMap::from([(1, pages(&[2])), (2, pages(&[1]))]),
        };

        let flattened = flatten_page_tree(&mut resolver, Reference::new(1, 0)).unwrap();
        assert!(flattened.is_empty());
    }

    #[test]
    fn media_box_inherits_through_parent() {
        let media_box = Object::Array(vec![
            Object::integer(0),
            Object::integer(0),
            Object::integer(612),
            Object::integer(792),
        ]);

        let mut root = Dictionary::new();
        root.insert("Type", Object::name("Pages"));
        root.insert(
            "Kids",
            Object::Array(vec![Object::Reference(Reference::new(2, 0))]),
        );
        root.insert("MediaBox", media_box.clone());

        let mut resolver = TestResolver {
            objects: HashMap::from([(1, Object::Dictionary(root)), (2, page(1))]),
        };

        let inherited =
            inherited_attribute(&mut resolver, Reference::new(2, 0), "MediaBox").unwrap();
        assert_eq!(inherited, Some(media_box));

        let absent = inherited_attribute(&mut resolver, Reference::new(2, 0), "CropBox").unwrap();
        assert_eq!(absent, None);
    }
}
