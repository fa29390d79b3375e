//! Named color themes, injected into the shell at construction.

use ratatui::style::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeName {
    Dark,
    Light,
}

impl ThemeName {
    pub fn toggled(self) -> Self {
        match self {
            ThemeName::Dark => ThemeName::Light,
            ThemeName::Light => ThemeName::Dark,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThemeName::Dark => "Dark",
            ThemeName::Light => "Light",
        }
    }
}

/// Foreground, accent, and the two background shades a theme applies
/// uniformly to the window.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub bg: Color,
    pub bg_alt: Color,
}

#[derive(Debug, Clone)]
pub struct Themes {
    dark: Theme,
    light: Theme,
}

impl Themes {
    pub fn builtin() -> Self {
        Self {
            dark: Theme {
                fg: Color::White,
                accent: Color::Rgb(0x00, 0xBF, 0xFF),
                bg: Color::Rgb(0x14, 0x1E, 0x30),
                bg_alt: Color::Rgb(0x24, 0x3B, 0x55),
            },
            light: Theme {
                fg: Color::Black,
                accent: Color::Rgb(0x00, 0x78, 0xD7),
                bg: Color::Rgb(0x89, 0xF7, 0xFE),
                bg_alt: Color::Rgb(0x66, 0xA6, 0xFF),
            },
        }
    }

    pub fn get(&self, name: ThemeName) -> &Theme {
        match name {
            ThemeName::Dark => &self.dark,
            ThemeName::Light => &self.light,
        }
    }
}
