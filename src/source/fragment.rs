//! XHTML rendering of a chapter's content container.
//!
//! Removals and image `src` rewrites are collected as [FragmentEdits] while the page is
//! inspected, then applied to the parsed tree through scraper's `TreeSink` impl. The
//! container's children are serialized with `xml5ever`, so the output is well-formed XML
//! that can go straight into an EPUB content document.

use ego_tree::NodeId;
use html5ever::tree_builder::{Attribute, ElementFlags, NodeOrText, TreeSink};
use html5ever::QualName;
use scraper::{ElementRef, Html, Node};
use xml5ever::serialize::{serialize, SerializeOpts, TraversalScope};

// The wrapping chapter document already declares the XHTML namespace.
const XHTML_NS_DECL: &str = r#" xmlns="http://www.w3.org/1999/xhtml""#;

/// Pending edits to apply before serialization.
#[derive(Debug, Default)]
pub(crate) struct FragmentEdits {
    removed: Vec<NodeId>,
    image_src: Vec<(NodeId, String)>,
}

impl FragmentEdits {
    /// Drop the node and its whole subtree.
    pub(crate) fn remove(&mut self, id: NodeId) {
        self.removed.push(id);
    }

    /// Replace the element's `src` and drop its `srcset`.
    pub(crate) fn rewrite_image(&mut self, id: NodeId, src: String) {
        self.image_src.push((id, src));
    }
}

/// Apply `edits` to `doc`, then serialize the children of `container` (not `container` itself).
pub(crate) fn render_fragment(
    mut doc: Html,
    container: NodeId,
    edits: &FragmentEdits,
) -> std::io::Result<String> {
    for id in &edits.removed {
        doc.remove_from_parent(id);
    }
    for (id, src) in &edits.image_src {
        if let Some((name, attrs)) = image_with_src(&doc, *id, src) {
            replace_element(&mut doc, *id, name, attrs);
        }
    }
    strip_undeclared_prefixes(&mut doc, container);

    let container = match doc.tree.get(container).and_then(ElementRef::wrap) {
        Some(c) => c,
        None => return Ok(String::new()),
    };
    let mut buf = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: TraversalScope::ChildrenOnly(None),
    };
    serialize(&mut buf, &container, opts)?;
    Ok(String::from_utf8_lossy(&buf).replace(XHTML_NS_DECL, ""))
}

/// Name and attributes of the image element `id`, with `src` replaced and `srcset` dropped.
fn image_with_src(doc: &Html, id: NodeId, src: &str) -> Option<(QualName, Vec<Attribute>)> {
    let elem = match doc.tree.get(id)?.value() {
        Node::Element(elem) => elem,
        _ => return None,
    };
    let mut attrs = Vec::new();
    for (name, value) in &elem.attrs {
        if &*name.local == "srcset" {
            continue;
        }
        let value = if &*name.local == "src" {
            src.into()
        } else {
            value.clone()
        };
        attrs.push(Attribute {
            name: name.clone(),
            value,
        });
    }
    Some((elem.name.clone(), attrs))
}

/// Swap element `id` for a new element, keeping its position and children.
fn replace_element(doc: &mut Html, id: NodeId, name: QualName, attrs: Vec<Attribute>) {
    let new_id = doc.create_element(name, attrs, ElementFlags::default());
    doc.reparent_children(&id, &new_id);
    doc.append_before_sibling(&id, NodeOrText::AppendNode(new_id));
    doc.remove_from_parent(&id);
}

/// Prefix-looking names (`o:p`, `v:shape="..."`) come from word processors without a
/// namespace declaration and are not valid XML. Such elements are unwrapped, such
/// attributes dropped. `xml:` and `xmlns:` names are fine.
fn strip_undeclared_prefixes(doc: &mut Html, container: NodeId) {
    let mut unwrap = Vec::new();
    let mut rebuild = Vec::new();
    if let Some(root) = doc.tree.get(container) {
        for node in root.descendants().skip(1) {
            let elem = match node.value() {
                Node::Element(elem) => elem,
                _ => continue,
            };
            if elem.name.local.contains(':') {
                unwrap.push(node.id());
                continue;
            }
            let kept: Vec<Attribute> = (&elem.attrs)
                .into_iter()
                .filter(|(name, _)| !is_undeclared_prefix(name))
                .map(|(name, value)| Attribute {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect();
            if kept.len() != elem.attrs.len() {
                rebuild.push((node.id(), elem.name.clone(), kept));
            }
        }
    }

    for (id, name, attrs) in rebuild {
        replace_element(doc, id, name, attrs);
    }
    for id in unwrap {
        let children: Vec<NodeId> = match doc.tree.get(id) {
            Some(node) => node.children().map(|c| c.id()).collect(),
            None => continue,
        };
        for child in children {
            doc.append_before_sibling(&id, NodeOrText::AppendNode(child));
        }
        doc.remove_from_parent(&id);
    }
}

fn is_undeclared_prefix(name: &QualName) -> bool {
    let local: &str = &name.local;
    name.prefix.is_none()
        && local.contains(':')
        && !local.starts_with("xml:")
        && !local.starts_with("xmlns:")
}
