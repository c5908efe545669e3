use serde::Serialize;

/// Command reference attached to a button or UI item
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntityCommand {
    pub cmd_id: String,
}

impl EntityCommand {
    pub fn new(cmd_id: impl Into<String>) -> Self {
        Self { cmd_id: cmd_id.into() }
    }
}

/// Physical button on the Remote
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    Power,
    VolumeUp,
    VolumeDown,
    Mute,
    Play,
    Next,
    Prev,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ButtonMapping {
    pub button: Button,
    pub short_press: EntityCommand,
}

impl ButtonMapping {
    pub fn short(button: Button, cmd_id: &str) -> Self {
        Self {
            button,
            short_press: EntityCommand::new(cmd_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Location {
    pub x: u8,
    pub y: u8,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Size {
    pub width: u8,
    pub height: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiItem {
    Icon {
        icon: String,
        location: Location,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<Size>,
        command: EntityCommand,
    },
}

impl UiItem {
    pub fn icon(icon: &str, x: u8, y: u8, cmd_id: impl Into<String>) -> Self {
        Self::Icon {
            icon: icon.to_string(),
            location: Location { x, y },
            size: None,
            command: EntityCommand::new(cmd_id),
        }
    }

    pub fn with_size(self, width: u8, height: u8) -> Self {
        match self {
            Self::Icon {
                icon,
                location,
                command,
                ..
            } => Self::Icon {
                icon,
                location,
                size: Some(Size { width, height }),
                command,
            },
        }
    }

    pub fn cmd_id(&self) -> &str {
        match self {
            Self::Icon { command, .. } => &command.cmd_id,
        }
    }
}

/// One page of the Remote's user interface, a 4x6 grid by default
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UiPage {
    pub page_id: String,
    pub name: String,
    pub grid: Size,
    pub items: Vec<UiItem>,
}

impl UiPage {
    pub fn new(page_id: &str, name: &str) -> Self {
        Self {
            page_id: page_id.to_string(),
            name: name.to_string(),
            grid: Size { width: 4, height: 6 },
            items: Vec::new(),
        }
    }

    pub fn with_grid(mut self, width: u8, height: u8) -> Self {
        self.grid = Size { width, height };
        self
    }

    pub fn add(&mut self, item: UiItem) {
        self.items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn icon_serializes_in_remote_layout() {
        let item = UiItem::icon("uc:play-pause", 1, 2, "PLAY_PAUSE").with_size(2, 1);
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({
                "type": "icon",
                "icon": "uc:play-pause",
                "location": { "x": 1, "y": 2 },
                "size": { "width": 2, "height": 1 },
                "command": { "cmd_id": "PLAY_PAUSE" }
            })
        );
    }

    #[test]
    fn button_mapping_uses_button_names() {
        let mapping = ButtonMapping::short(Button::VolumeUp, "VOLUME_UP");
        assert_eq!(
            serde_json::to_value(&mapping).unwrap(),
            json!({ "button": "VOLUME_UP", "short_press": { "cmd_id": "VOLUME_UP" } })
        );
    }
}
