//! Phrase segmentation for incremental synthesis.

const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "etc.", "vs.", "e.g.", "i.e.", "a.m.", "p.m.", "Inc.",
    "Ltd.", "Corp.",
];

/// Split text into phrases at sentence and clause punctuation.
///
/// Trailing spaces stay attached to the phrase they follow. Abbreviations and
/// commas inside numbers ("1,000") do not split. Text without punctuation comes
/// back as a single phrase; pieces without any letters or digits are dropped.
pub fn split_phrases(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut phrases = Vec::new();
    let mut current = String::new();

    let mut i = 0;
    while i < chars.len() {
        current.push(chars[i]);

        let boundary = match chars[i] {
            '.' | '!' | '?' => !ends_with_abbreviation(&current, chars.get(i + 1).copied()),
            ',' => !is_number_comma(&chars, i),
            ';' | ':' => true,
            _ => false,
        };

        if boundary {
            if chars.get(i + 1) == Some(&' ') {
                current.push(' ');
                i += 1;
            }
            if is_speakable(&current) {
                phrases.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }

        i += 1;
    }

    if is_speakable(&current) {
        phrases.push(current);
    }

    phrases
}

/// Silence to append after a phrase, based on how it ends.
pub fn pause_after_ms(phrase: &str) -> u32 {
    let trimmed = phrase.trim_end();
    if trimmed.ends_with(['.', '!', '?']) {
        400
    } else if trimmed.ends_with([';', ':']) {
        250
    } else if trimmed.ends_with(',') {
        150
    } else {
        100
    }
}

fn is_speakable(piece: &str) -> bool {
    piece.chars().any(char::is_alphanumeric)
}

// "Dr.Smith" style: a period glued to the next word after a known abbreviation
fn ends_with_abbreviation(current: &str, next: Option<char>) -> bool {
    match next {
        Some(c) if c != ' ' => ABBREVIATIONS.iter().any(|abbr| current.ends_with(abbr)),
        _ => false,
    }
}

fn is_number_comma(chars: &[char], i: usize) -> bool {
    if i == 0 || i + 1 >= chars.len() {
        return false;
    }
    let prev = chars[i - 1];
    let next = chars[i + 1];
    prev.is_ascii_digit() && next.is_ascii_digit()
}
