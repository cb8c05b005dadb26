//! Terminal presentation: theme and accent colour
//!
//! Program output goes to stdout untouched. Status lines (run started, run
//! finished, errors) go to stderr and are the only thing styled here.

use std::io::IsTerminal;
use std::str::FromStr;

use eyre::{Result, eyre};
use owo_colors::{OwoColorize, Style};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl FromStr for Theme {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(eyre!("Unknown theme `{other}` (expected `dark` or `light`)")),
        }
    }
}

/// An `#rrggbb` colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl FromStr for Rgb {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(eyre!("Invalid accent colour `{s}` (expected #rrggbb)"));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| eyre!("Invalid accent colour `{s}` (expected #rrggbb)"))
        };
        Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// Styling applied to status lines
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub theme: Theme,
    pub accent: Option<Rgb>,
    /// Emit ANSI styling at all
    pub color: bool,
}

impl RenderConfig {
    pub fn new(theme: Theme, accent: Option<&str>) -> Result<Self> {
        let accent = accent.map(str::parse::<Rgb>).transpose()?;
        Ok(Self {
            theme,
            accent,
            color: std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        })
    }

    pub fn plain() -> Self {
        Self {
            theme: Theme::default(),
            accent: None,
            color: false,
        }
    }

    fn accent_style(&self) -> Style {
        match (self.accent, self.theme) {
            (Some(Rgb(r, g, b)), _) => Style::new().truecolor(r, g, b).bold(),
            (None, Theme::Dark) => Style::new().bright_cyan().bold(),
            (None, Theme::Light) => Style::new().blue().bold(),
        }
    }

    fn dim_style(&self) -> Style {
        match self.theme {
            Theme::Dark => Style::new().dimmed(),
            Theme::Light => Style::new().bright_black(),
        }
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    /// `label` in the accent colour followed by `message`
    pub fn status(&self, label: &str, message: &str) -> String {
        format!("{} {}", self.paint(label, self.accent_style()), message)
    }

    pub fn note(&self, message: &str) -> String {
        self.paint(message, self.dim_style())
    }

    pub fn error(&self, message: &str) -> String {
        format!("{} {}", self.paint("error:", Style::new().red().bold()), message)
    }

    pub fn success(&self, label: &str, message: &str) -> String {
        format!("{} {}", self.paint(label, Style::new().green().bold()), message)
    }
}
