/// English ordinal for a positive count: 1st, 2nd, 3rd, 4th, 11th, 21st, 111th.
pub fn ordinal(n: i64) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{n}{suffix}")
}

pub fn scan_message(position: i64) -> String {
    format!("You're the {} student to scan!", ordinal(position))
}
