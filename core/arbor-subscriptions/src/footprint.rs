//! Matching change events against what a live get read.

use arbor_engine::GetMeta;
use arbor_types::{is_under, ChangeEvent, ChangeOp};
use std::collections::BTreeMap;

/// Outcome of matching one event against one footprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Affects {
    No,
    Yes,
    /// Affected when the entity is, or was, in one of these member sets
    /// (member key → origins).
    IfMember(BTreeMap<String, Vec<String>>),
}

/// Whether a write to `written` can change a read of `read`.
fn overlaps(read: &str, written: &str) -> bool {
    read == written || is_under(read, written) || is_under(written, read)
}

/// Fields whose value a write to `field` may change: the field itself plus
/// every alias resolved through it.
fn written_fields<'a>(meta: &'a GetMeta, field: &'a str) -> Vec<&'a str> {
    let mut fields = vec![field];
    for (target, aliases) in &meta.refs {
        if overlaps(target, field) {
            fields.extend(aliases.iter().map(String::as_str));
        }
    }
    fields
}

/// Matches `event` against `meta`. `type_name` is the type of the entity
/// the event is about; it narrows type-filtered member dependencies.
pub(crate) fn affects(meta: &GetMeta, event: &ChangeEvent, type_name: Option<&str>) -> Affects {
    let mut sets = BTreeMap::new();
    match event.op {
        ChangeOp::Created => return Affects::No,
        ChangeOp::Delete => {
            if meta.all_ids().contains(event.entity_id.as_str()) {
                return Affects::Yes;
            }
            sets.extend(meta.contains.iter().map(|(k, o)| (k.clone(), o.clone())));
        }
        ChangeOp::Update => {
            for written in written_fields(meta, &event.field) {
                for (read, dep) in &meta.fields {
                    if !overlaps(read, written) {
                        continue;
                    }
                    if dep.ids.contains(&event.entity_id) {
                        return Affects::Yes;
                    }
                    for key in dep.member_keys(type_name) {
                        if let Some(origins) = meta.contains.get(key) {
                            sets.insert(key.clone(), origins.clone());
                        }
                    }
                }
            }
        }
    }
    if sets.is_empty() {
        Affects::No
    } else {
        Affects::IfMember(sets)
    }
}
