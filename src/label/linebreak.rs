//! Paragraph line breaking.
//!
//! Break points are chosen by dynamic programming over the breakable
//! positions: every candidate remembers the cheapest chain of earlier
//! breaks leading to it, and the final break's chain is the answer.

use super::text::{is_breakable, is_whitespace};

/// Anything with a character code and an advance width
pub trait Advance {
    fn code(&self) -> char;
    fn advance(&self) -> f64;
}

impl Advance for (char, f64) {
    fn code(&self) -> char {
        self.0
    }

    fn advance(&self) -> f64 {
        self.1
    }
}

struct Break {
    index: usize,
    x: f64,
    badness: f64,
    prior: Option<usize>,
}

fn penalty(code: char, next: char) -> f64 {
    let mut penalty = 0.0;
    if code == '\n' {
        penalty -= 10000.0;
    }
    // Avoid ending a line on an opening parenthesis
    if code == '(' || code == '\u{ff08}' {
        penalty += 50.0;
    }
    // ...or starting one on a closing parenthesis
    if next == ')' || next == '\u{ff09}' {
        penalty += 50.0;
    }
    penalty
}

fn badness(width: f64, target: f64, penalty: f64, is_last: bool) -> f64 {
    let raggedness = (width - target).powi(2);
    if !is_last {
        return raggedness + penalty.abs() * penalty;
    }
    // A short last line reads better than a long one
    if width < target {
        raggedness / 2.0
    } else {
        raggedness * 2.0
    }
}

fn evaluate(
    index: usize,
    x: f64,
    target: f64,
    candidates: &[Break],
    penalty: f64,
    is_last: bool,
) -> Break {
    let mut best = Break {
        index,
        x,
        badness: badness(x, target, penalty, is_last),
        prior: None,
    };
    for (i, prev) in candidates.iter().enumerate() {
        let total = badness(x - prev.x, target, penalty, is_last) + prev.badness;
        if total < best.badness {
            best.badness = total;
            best.prior = Some(i);
        }
    }
    best
}

/// Exclusive end index of every line, the last one always `glyphs.len()`.
/// `spacing` and `max_width` are in the same units as the advances.
pub fn break_points<G: Advance>(glyphs: &[G], spacing: f64, max_width: f64) -> Vec<usize> {
    let total: f64 = glyphs.iter().map(|g| g.advance() + spacing).sum();
    let line_count = (total / max_width).ceil().max(1.0);
    let target = total / line_count;

    let mut candidates: Vec<Break> = Vec::new();
    let mut cursor = 0.0;
    let last = glyphs.len().saturating_sub(1);

    for (i, glyph) in glyphs.iter().enumerate() {
        let code = glyph.code();
        if !is_whitespace(code) {
            cursor += glyph.advance() + spacing;
        }
        if i == last || !is_breakable(code) {
            continue;
        }
        let penalty = penalty(code, glyphs[i + 1].code());
        let candidate = evaluate(i + 1, cursor, target, &candidates, penalty, false);
        candidates.push(candidate);
    }

    let final_break = evaluate(glyphs.len(), cursor, target, &candidates, 0.0, true);

    let mut breaks = vec![final_break.index];
    let mut prior = final_break.prior;
    while let Some(i) = prior {
        breaks.push(candidates[i].index);
        prior = candidates[i].prior;
    }
    breaks.reverse();
    breaks
}

/// Split glyphs into lines, trimming whitespace from both ends of each
pub fn split_lines<G: Advance>(glyphs: &[G], spacing: f64, max_width: f64) -> Vec<&[G]> {
    let mut start = 0;
    break_points(glyphs, spacing, max_width)
        .into_iter()
        .map(|end| {
            let mut line = &glyphs[start..end];
            start = end;
            while let [first, rest @ ..] = line {
                if !is_whitespace(first.code()) {
                    break;
                }
                line = rest;
            }
            while let [rest @ .., last] = line {
                if !is_whitespace(last.code()) {
                    break;
                }
                line = rest;
            }
            line
        })
        .collect()
}

/// Width of a laid-out line: advances plus spacing between glyphs
pub fn measure_line<G: Advance>(line: &[G], spacing: f64) -> f64 {
    if line.is_empty() {
        return 0.0;
    }
    let advances: f64 = line.iter().map(Advance::advance).sum();
    advances + spacing * (line.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyphs(text: &str) -> Vec<(char, f64)> {
        text.chars().map(|c| (c, 10.0)).collect()
    }

    fn text(line: &[(char, f64)]) -> String {
        line.iter().map(|g| g.0).collect()
    }

    #[test]
    fn test_eight_words_three_lines() {
        // Eight 10-wide glyphs joined by zero-width spaces
        let mut input = Vec::new();
        for (i, c) in "abcdefgh".chars().enumerate() {
            input.push((c, 10.0));
            if i < 7 {
                input.push(('\u{200b}', 0.0));
            }
        }
        assert_eq!(break_points(&input, 0.0, 35.0), vec![6, 12, 15]);
        let widths: Vec<f64> = split_lines(&input, 0.0, 35.0)
            .iter()
            .map(|l| l.iter().map(|g| g.1).sum())
            .collect();
        assert_eq!(widths, vec![30.0, 30.0, 20.0]);
    }

    #[test]
    fn test_spaces_trimmed() {
        let input = glyphs("ab cd ef gh");
        assert_eq!(break_points(&input, 0.0, 35.0), vec![3, 6, 9, 11]);
        let lines: Vec<String> = split_lines(&input, 0.0, 35.0).iter().map(|l| text(l)).collect();
        assert_eq!(lines, vec!["ab", "cd", "ef", "gh"]);
    }

    #[test]
    fn test_newline_forces_break() {
        let input = glyphs("one two\nthree");
        assert_eq!(break_points(&input, 0.0, 1000.0), vec![8, 13]);
        let lines: Vec<String> = split_lines(&input, 0.0, 1000.0).iter().map(|l| text(l)).collect();
        assert_eq!(lines, vec!["one two", "three"]);
    }

    #[test]
    fn test_parenthesis_penalty() {
        // Breaking after "(" would balance better but is penalised
        let input = glyphs("ab (cd) ef");
        let lines: Vec<String> = split_lines(&input, 0.0, 45.0).iter().map(|l| text(l)).collect();
        assert_eq!(lines, vec!["ab", "(cd)", "ef"]);
    }

    #[test]
    fn test_unbreakable_word_single_line() {
        let input = glyphs("abcdefgh");
        assert_eq!(break_points(&input, 0.0, 35.0), vec![8]);
    }

    #[test]
    fn test_measure_line_spacing_between_glyphs() {
        let input = glyphs("abcd");
        assert_eq!(measure_line(&input, 2.0), 46.0);
        assert_eq!(measure_line::<(char, f64)>(&[], 2.0), 0.0);
    }
}
