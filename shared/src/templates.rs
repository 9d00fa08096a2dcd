use crate::types::StackParameter;

/// Replace placeholder values inside an ordered parameter list.
///
/// Matching is on the parameter *value*, not its key: templates pre-declare
/// typed placeholder parameters that get filled by identity. A placeholder
/// with no matching entry is skipped. Order and length are preserved.
pub fn substitute(parameters: &mut [StackParameter], replacements: &[(&str, &str)]) {
    for (placeholder, value) in replacements {
        if let Some(parameter) = parameters.iter_mut().find(|p| p.value == *placeholder) {
            parameter.value = (*value).to_string();
        }
    }
}
