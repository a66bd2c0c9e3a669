/// Lays out the top bar: the caller's title followed by the help text.
///
/// The help text always wins. When both do not fit, the title is cut from
/// the right (with a `..` marker when there is room for one); otherwise the
/// whole message is centered, the odd leftover column going to the right.
pub fn fit_banner(width: usize, title: &str, help: &str) -> String {
    let msg: Vec<char> = if title.is_empty() {
        help.chars().collect()
    } else {
        format!(". {help}").chars().collect()
    };

    if msg.len() > width {
        return msg[msg.len() - width..].iter().collect();
    }

    let title: Vec<char> = title.chars().collect();
    let total = title.len() + msg.len();
    if total > width {
        let shortfall = total - width;
        let msg: String = msg.iter().collect();
        if title.len() <= 2 {
            return format!("{}{msg}", cut_right(&title, shortfall));
        }
        let room = width - msg.chars().count();
        if room <= 2 {
            return format!("{}{msg}", ".".repeat(room));
        }
        return format!("{}..{msg}", cut_right(&title, shortfall + 2));
    }

    let space = width - total;
    let left = space / 2;
    let right = space - left;
    format!(
        "{}{}{}{}",
        " ".repeat(left),
        title.iter().collect::<String>(),
        msg.iter().collect::<String>(),
        " ".repeat(right)
    )
}

fn cut_right(chars: &[char], count: usize) -> String {
    let keep = chars.len().saturating_sub(count);
    chars[..keep].iter().collect()
}
