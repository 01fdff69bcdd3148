//! Dot-path field access over `serde_json::Value`, shared between the
//! filter evaluator (§4.8) and the webhook exclude-field masker (§4.5).

use serde_json::Value;

/// Read a field by dot-path, e.g. `"address.city"`.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Remove a field by dot-path, mutating `value` in place. No-op if the
/// path doesn't exist. Intermediate containers are left in place even if
/// the removal empties them — excluding one field must never delete its
/// parent object.
pub fn remove_path(value: &mut Value, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = value;
    for segment in segments {
        match current.as_object_mut().and_then(|o| o.get_mut(segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(obj) = current.as_object_mut() {
        obj.remove(last);
    }
}

/// Remove every field named in `paths` from `value`, in place.
pub fn mask_fields(value: &mut Value, paths: &[String]) {
    for path in paths {
        remove_path(value, path);
    }
}
