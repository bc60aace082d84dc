use std::collections::BTreeMap;

use super::ClassifierError;

/// Train and validation row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Deterministic stratified split.
///
/// Rows are grouped by class and ordered by a blake3 hash of `seed`, class and row key,
/// so the same samples always land on the same side regardless of input order. Each
/// class contributes `round(n * fraction)` rows to validation, clamped so both sides
/// keep at least one row; classes with fewer than two rows cannot be stratified.
pub fn stratified_split(
    keys: &[&str],
    labels: &[usize],
    classes: &[String],
    seed: u64,
    validation_fraction: f32,
) -> Result<SplitIndices, ClassifierError> {
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(ClassifierError::InvalidOptions(format!(
            "validation fraction must be within (0, 1), got {validation_fraction}"
        )));
    }
    if keys.len() != labels.len() {
        return Err(ClassifierError::InvalidOptions(
            "Mismatched key/label lengths".to_string(),
        ));
    }

    let mut by_class: BTreeMap<usize, Vec<(u128, usize)>> = BTreeMap::new();
    for (row, (&key, &label)) in keys.iter().zip(labels).enumerate() {
        let class_id = classes.get(label).map(String::as_str).unwrap_or("");
        let hash = blake3::hash(format!("{seed}|{class_id}|{key}").as_bytes());
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&hash.as_bytes()[..16]);
        by_class
            .entry(label)
            .or_default()
            .push((u128::from_le_bytes(prefix), row));
    }

    let mut split = SplitIndices {
        train: Vec::new(),
        validation: Vec::new(),
    };
    for (label, mut entries) in by_class {
        let n = entries.len();
        if n < 2 {
            let class_id = classes.get(label).map(String::as_str).unwrap_or("?");
            return Err(ClassifierError::InsufficientData(format!(
                "class {class_id} has {n} sample(s); at least 2 are needed for a stratified split"
            )));
        }
        entries.sort();
        let val_n = ((n as f64) * validation_fraction as f64).round() as usize;
        let val_n = val_n.clamp(1, n - 1);
        for (idx, (_hash, row)) in entries.into_iter().enumerate() {
            if idx < val_n {
                split.validation.push(row);
            } else {
                split.train.push(row);
            }
        }
    }
    split.train.sort_unstable();
    split.validation.sort_unstable();
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn singleton_class_cannot_be_stratified() {
        let keys = ["m1", "m2", "m3", "m4"];
        let labels = [0, 0, 1, 2];
        let result = stratified_split(&keys, &labels, &classes(&["a", "b", "c"]), 7, 0.2);
        assert!(matches!(result, Err(ClassifierError::InsufficientData(_))));
    }

    #[test]
    fn every_class_lands_on_both_sides() {
        let keys: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let labels: Vec<usize> = (0..20).map(|i| if i < 15 { 0 } else { 1 }).collect();
        let split = stratified_split(&keys, &labels, &classes(&["a", "b"]), 1, 0.2).unwrap();
        assert_eq!(split.validation.len(), 3 + 1);
        assert_eq!(split.train.len() + split.validation.len(), 20);
        assert!(split.validation.iter().any(|&row| labels[row] == 1));
        assert!(split.train.iter().any(|&row| labels[row] == 1));
    }

    #[test]
    fn split_is_independent_of_input_order() {
        let keys = ["a1", "a2", "a3", "b1", "b2", "b3"];
        let labels = [0, 0, 0, 1, 1, 1];
        let names = classes(&["a", "b"]);
        let forward = stratified_split(&keys, &labels, &names, 9, 0.34).unwrap();
        let val_keys: Vec<&str> = forward.validation.iter().map(|&i| keys[i]).collect();

        let rev_keys: Vec<&str> = keys.iter().rev().copied().collect();
        let rev_labels: Vec<usize> = labels.iter().rev().copied().collect();
        let reversed = stratified_split(&rev_keys, &rev_labels, &names, 9, 0.34).unwrap();
        let mut rev_val: Vec<&str> = reversed.validation.iter().map(|&i| rev_keys[i]).collect();
        let mut val_keys = val_keys;
        val_keys.sort();
        rev_val.sort();
        assert_eq!(val_keys, rev_val);
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let result = stratified_split(&["a", "b"], &[0, 0], &classes(&["a"]), 0, 1.0);
        assert!(matches!(result, Err(ClassifierError::InvalidOptions(_))));
    }
}
