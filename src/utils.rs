use std::collections::HashMap;

/// [Shannon entropy][entropy] (base 2) of a distribution given by counts.
///
/// ```text
/// H = -Σ p_i log2(p_i),  p_i = counts_i / total
/// ```
///
/// Zero counts contribute nothing; an empty distribution has zero entropy.
///
/// [entropy]: https://en.wikipedia.org/wiki/Entropy_(information_theory)
pub fn entropy(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let divisor = total as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / divisor;
            -p * p.log2()
        })
        .sum()
}

/// Keys of a map in ascending order, for deterministic iteration and printing.
pub fn sorted_keys<K, V>(map: &HashMap<K, V>) -> Vec<K>
where
    K: Copy + Ord,
{
    let mut keys: Vec<K> = map.keys().copied().collect();
    keys.sort_unstable();
    keys
}
