pub(crate) struct Symbols {
    pub prompt: &'static str,
    pub check: &'static str,
    pub cross: &'static str,
    pub running: &'static str,
    pub ellipsis: &'static str,
    pub record: &'static str,
    pub corner: &'static str,
    pub bullet: &'static str,
    pub warning: &'static str,
}

impl Symbols {
    pub fn current() -> &'static Self {
        #[cfg(windows)]
        {
            let is_modern = std::env::var("WT_SESSION").is_ok()
                || std::env::var("TERM_PROGRAM").is_ok()
                || std::env::var("ALACRITTY_WINDOW_ID").is_ok();
            if !is_modern {
                return &ASCII_SYMBOLS;
            }
        }
        &UNICODE_SYMBOLS
    }
}

const UNICODE_SYMBOLS: Symbols = Symbols {
    prompt: "❯",
    check: "✔",
    cross: "✘",
    running: "◎",
    ellipsis: "…",
    record: "⏺",
    corner: "⎿",
    bullet: "•",
    warning: "⚠",
};

#[cfg(windows)]
const ASCII_SYMBOLS: Symbols = Symbols {
    prompt: ">",
    check: "[ok]",
    cross: "[x]",
    running: "[~]",
    ellipsis: "...",
    record: "*",
    corner: "\\",
    bullet: "*",
    warning: "!",
};
