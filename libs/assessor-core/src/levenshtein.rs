// Weighted edit distance used for fuzzy symbol and file-name matching

/// Edit costs. A substitution that only changes letter case costs
/// `capitalisation` instead of `substitution`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levenshtein {
    pub insertion: f64,
    pub deletion: f64,
    pub substitution: f64,
    pub capitalisation: f64,
}

impl Default for Levenshtein {
    fn default() -> Self {
        Self {
            insertion: 1.0,
            deletion: 1.0,
            substitution: 2.0,
            capitalisation: 0.5,
        }
    }
}

impl Levenshtein {
    pub fn distance(&self, x: &str, y: &str) -> f64 {
        let x: Vec<char> = x.chars().collect();
        let y: Vec<char> = y.chars().collect();

        let mut previous: Vec<f64> = (0..=y.len()).map(|j| j as f64 * self.insertion).collect();
        let mut current = vec![0.0; y.len() + 1];

        for i in 1..=x.len() {
            current[0] = i as f64 * self.deletion;
            for j in 1..=y.len() {
                let replace = previous[j - 1] + self.replacement_cost(x[i - 1], y[j - 1]);
                let delete = previous[j] + self.deletion;
                let insert = current[j - 1] + self.insertion;
                current[j] = replace.min(delete).min(insert);
            }
            std::mem::swap(&mut previous, &mut current);
        }

        previous[y.len()]
    }

    fn replacement_cost(&self, a: char, b: char) -> f64 {
        if a == b {
            0.0
        } else if a.to_lowercase().eq(b.to_lowercase()) {
            self.capitalisation
        } else {
            self.substitution
        }
    }

    /// True when the distance is at most `ratio` of the longer length, rounded.
    pub fn similar(&self, x: &str, y: &str, ratio: f64) -> bool {
        let longest = x.chars().count().max(y.chars().count());
        let limit = (ratio * longest as f64).round();
        self.distance(x, y) <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_costs() {
        let metric = Levenshtein::default();
        assert_eq!(metric.distance("", ""), 0.0);
        assert_eq!(metric.distance("abc", ""), 3.0);
        assert_eq!(metric.distance("", "abc"), 3.0);
        assert_eq!(metric.distance("cat", "cut"), 2.0);
        assert_eq!(metric.distance("Queue", "queue"), 0.5);
        assert_eq!(metric.distance("enqueu", "enqueue"), 1.0);
    }

    #[test]
    fn test_similar_uses_longer_name() {
        let metric = Levenshtein::default();
        assert!(metric.similar("enqueu", "enqueue", 0.2));
        assert!(!metric.similar("enq", "enqueue", 0.2));
        assert!(metric.similar("size", "Size", 0.2));
        assert!(metric.similar("same", "same", 0.0));
    }
}
