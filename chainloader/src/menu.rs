//! Payload selection.
//!
//! A minimal cursor menu over the payload catalog, and the boot-time choice
//! between it and the default payload.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::payloads::PayloadCatalog;

/// One input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuInput {
    Up,
    Down,
    Confirm,
    /// Nothing pressed this frame
    Idle,
}

/// Cursor over catalog entries in name order.
pub struct PayloadMenu<'a> {
    entries: Vec<(&'a str, &'a str)>,
    cursor: usize,
}

impl<'a> PayloadMenu<'a> {
    /// Menu over `catalog`, cursor on the first entry.
    pub fn new(catalog: &'a PayloadCatalog) -> Self {
        Self {
            entries: catalog
                .iter()
                .map(|(name, path)| (name.as_str(), path.as_str()))
                .collect(),
            cursor: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the menu has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the highlighted entry.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Path of the highlighted entry.
    pub fn selected(&self) -> Option<&'a str> {
        self.entries.get(self.cursor).map(|&(_, path)| path)
    }

    /// Apply one input. Returns the chosen path on `Confirm`.
    pub fn handle(&mut self, input: MenuInput) -> Option<&'a str> {
        match input {
            MenuInput::Up => self.cursor = self.cursor.saturating_sub(1),
            MenuInput::Down => {
                if self.cursor + 1 < self.entries.len() {
                    self.cursor += 1;
                }
            }
            MenuInput::Confirm => return self.selected(),
            MenuInput::Idle => {}
        }
        None
    }

    /// Write one line per entry, `"> "` marking the cursor.
    pub fn render<W: Write>(&self, out: &mut W) -> fmt::Result {
        for (index, (name, _)) in self.entries.iter().enumerate() {
            let marker = if index == self.cursor { "> " } else { "  " };
            writeln!(out, "{}{}", marker, name)?;
        }
        Ok(())
    }
}

/// Pick the payload to load.
///
/// Without `menu_requested` the `default` path is used. Otherwise inputs
/// are fed to the menu until one confirms; an empty catalog or running out
/// of input falls back to `default`.
pub fn select_payload<I>(
    menu_requested: bool,
    catalog: &PayloadCatalog,
    default: &str,
    inputs: I,
) -> String
where
    I: IntoIterator<Item = MenuInput>,
{
    select_payload_with(menu_requested, catalog, default, inputs, |_| {})
}

/// [`select_payload`] that shows the menu to `frame` before every input.
///
/// `inputs` is pulled lazily, one item per frame, so a pad reader can block
/// until the next frame.
pub fn select_payload_with<I, F>(
    menu_requested: bool,
    catalog: &PayloadCatalog,
    default: &str,
    inputs: I,
    mut frame: F,
) -> String
where
    I: IntoIterator<Item = MenuInput>,
    F: FnMut(&PayloadMenu<'_>),
{
    if !menu_requested {
        return String::from(default);
    }
    if catalog.is_empty() {
        log::warn!("[Loader] No payloads found, using {}", default);
        return String::from(default);
    }

    let mut menu = PayloadMenu::new(catalog);
    for input in inputs {
        frame(&menu);
        if let Some(path) = menu.handle(input) {
            log::info!("[Loader] Selected {}", path);
            return String::from(path);
        }
    }

    String::from(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PAYLOAD;
    use alloc::string::ToString;

    fn catalog() -> PayloadCatalog {
        ["default", "homebrew_launcher", "tool"]
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    alloc::format!("wiiu/payloads/{}/payload.elf", name),
                )
            })
            .collect()
    }

    #[test]
    fn test_cursor_clamps() {
        let catalog = catalog();
        let mut menu = PayloadMenu::new(&catalog);

        menu.handle(MenuInput::Up);
        assert_eq!(menu.cursor(), 0);

        for _ in 0..10 {
            menu.handle(MenuInput::Down);
        }
        assert_eq!(menu.cursor(), 2);
        assert_eq!(menu.selected(), Some("wiiu/payloads/tool/payload.elf"));
    }

    #[test]
    fn test_render_marks_cursor() {
        let catalog = catalog();
        let mut menu = PayloadMenu::new(&catalog);
        menu.handle(MenuInput::Down);

        let mut out = String::new();
        menu.render(&mut out).unwrap();
        assert_eq!(out, "  default\n> homebrew_launcher\n  tool\n");
    }

    #[test]
    fn test_select_without_menu_uses_default() {
        let inputs = [MenuInput::Down, MenuInput::Confirm];
        let path = select_payload(false, &catalog(), DEFAULT_PAYLOAD, inputs);
        assert_eq!(path, DEFAULT_PAYLOAD);
    }

    #[test]
    fn test_select_with_menu() {
        let inputs = [MenuInput::Down, MenuInput::Idle, MenuInput::Confirm];
        let path = select_payload(true, &catalog(), DEFAULT_PAYLOAD, inputs);
        assert_eq!(path, "wiiu/payloads/homebrew_launcher/payload.elf");
    }

    #[test]
    fn test_empty_catalog_falls_back() {
        let empty = PayloadCatalog::new();
        let path = select_payload(true, &empty, DEFAULT_PAYLOAD, [MenuInput::Confirm]);
        assert_eq!(path, DEFAULT_PAYLOAD);
    }

    #[test]
    fn test_frame_sees_menu_before_each_input() {
        let inputs = [MenuInput::Down, MenuInput::Down, MenuInput::Up, MenuInput::Confirm];
        let mut frames = Vec::new();

        let path = select_payload_with(true, &catalog(), DEFAULT_PAYLOAD, inputs, |menu| {
            let mut screen = String::new();
            menu.render(&mut screen).unwrap();
            frames.push((menu.cursor(), screen));
        });

        assert_eq!(path, "wiiu/payloads/homebrew_launcher/payload.elf");
        let cursors: Vec<usize> = frames.iter().map(|(cursor, _)| *cursor).collect();
        assert_eq!(cursors, [0, 1, 2, 1]);
        assert_eq!(frames[2].1, "  default\n  homebrew_launcher\n> tool\n");
    }

    #[test]
    fn test_inputs_pulled_lazily_until_confirm() {
        let mut pulled = 0;
        let inputs = core::iter::repeat_with(|| {
            pulled += 1;
            if pulled == 3 {
                MenuInput::Confirm
            } else {
                MenuInput::Idle
            }
        });

        let path = select_payload_with(true, &catalog(), DEFAULT_PAYLOAD, inputs, |_| {});

        assert_eq!(path, "wiiu/payloads/default/payload.elf");
        assert_eq!(pulled, 3);
    }

    #[test]
    fn test_no_frames_without_menu() {
        let mut frames = 0;
        select_payload_with(false, &catalog(), DEFAULT_PAYLOAD, [MenuInput::Confirm], |_| {
            frames += 1
        });
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_confirm_on_empty_menu_is_none() {
        let empty = PayloadCatalog::new();
        let mut menu = PayloadMenu::new(&empty);
        assert!(menu.is_empty());
        assert_eq!(menu.handle(MenuInput::Confirm), None);
    }
}
