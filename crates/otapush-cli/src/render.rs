use anstyle::{AnsiColor, Effects, Style};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {}", status.to_ascii_uppercase(), message),
    }
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> String {
    match style {
        OutputStyle::Plain => title.to_string(),
        OutputStyle::Rich => colorize(section_style(), &format!("== {title} ==")),
    }
}

fn section_style() -> Style {
    Style::new()
        .effects(Effects::BOLD)
        .fg_color(Some(AnsiColor::Cyan.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
