//! "Did you mean" suggestions for names looked up by string

/// Pick the candidate closest to `name`, if any is close enough.
///
/// Matching is case-insensitive. A candidate qualifies when its edit distance
/// is within a third of the name's length (at least 2), or when one name is
/// a prefix of the other.
pub fn did_you_mean<'a, I>(name: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = name.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let threshold = (needle.chars().count() / 3).max(2);

    let mut best: Option<(usize, &'a str)> = None;
    for candidate in candidates {
        let lowered = candidate.to_lowercase();
        let mut distance = edit_distance(&needle, &lowered);
        if distance > threshold && (lowered.starts_with(&needle) || needle.starts_with(&lowered)) {
            distance = threshold;
        }
        if distance > threshold {
            continue;
        }
        match best {
            Some((best_distance, _)) if best_distance <= distance => {}
            _ => best = Some((distance, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate.to_string())
}

/// Format a suggestion as a message suffix (`", did you mean 'x'?"`)
pub fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(". Did you mean '{}'?", s),
        None => String::new(),
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
