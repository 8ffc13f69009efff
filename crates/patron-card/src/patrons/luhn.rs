//! Luhn (mod 10) check digits for patron barcodes.

fn digits(code: &str) -> Option<Vec<u32>> {
    code.chars().map(|c| c.to_digit(10)).collect()
}

/// A doubled digit folds to `2d mod 9`, with a zero remainder counting as 9.
fn fold_doubled(digit: u32) -> u32 {
    match (digit * 2) % 9 {
        0 => 9,
        folded => folded,
    }
}

/// Luhn sum of `payload` (digits without a check digit), doubling every second digit
/// starting from the rightmost payload digit.
fn payload_sum(payload: &[u32]) -> u32 {
    payload
        .iter()
        .rev()
        .enumerate()
        .map(|(index, &digit)| {
            if index % 2 == 0 {
                fold_doubled(digit)
            } else {
                digit
            }
        })
        .sum()
}

/// Check digit for a digit string that does not yet carry one.
pub fn check_digit(payload: &str) -> Option<u32> {
    let payload = digits(payload)?;
    if payload.is_empty() {
        return None;
    }
    Some((10 - payload_sum(&payload) % 10) % 10)
}

/// Appends the Luhn check digit to `payload`.
pub fn luhn_calculate(payload: &str) -> Option<String> {
    let digit = check_digit(payload)?;
    Some(format!("{payload}{digit}"))
}

/// True when the final digit of `code` is the correct check digit for the rest.
pub fn luhn_validate(code: &str) -> bool {
    let Some(all) = digits(code) else {
        return false;
    };
    let Some((&check, payload)) = all.split_last() else {
        return false;
    };
    if payload.is_empty() {
        return false;
    }
    (payload_sum(payload) + check) % 10 == 0
}
