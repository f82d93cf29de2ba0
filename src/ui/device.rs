//! Per-device capability: key mapping, main menu, and wipe hooks.

#![allow(missing_docs)]

/// Linux input key codes the maintenance UI understands.
pub mod keys {
    pub const KEY_1: u32 = 2;
    pub const KEY_9: u32 = 10;
    pub const KEY_ENTER: u32 = 28;
    pub const KEY_HOME: u32 = 102;
    pub const KEY_UP: u32 = 103;
    pub const KEY_PAGEUP: u32 = 104;
    pub const KEY_DOWN: u32 = 108;
    pub const KEY_PAGEDOWN: u32 = 109;
    pub const KEY_VOLUMEDOWN: u32 = 114;
    pub const KEY_VOLUMEUP: u32 = 115;
    pub const KEY_POWER: u32 = 116;
    pub const KEY_BACK: u32 = 158;
    pub const KEY_HOMEPAGE: u32 = 172;
    pub const KEY_REFRESH: u32 = 173;
}

use keys::{
    KEY_1, KEY_9, KEY_BACK, KEY_DOWN, KEY_ENTER, KEY_HOME, KEY_HOMEPAGE, KEY_PAGEDOWN, KEY_PAGEUP,
    KEY_POWER, KEY_REFRESH, KEY_UP, KEY_VOLUMEDOWN, KEY_VOLUMEUP,
};

/// Navigation primitives a key can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuPrimitive {
    NoAction,
    MoveUp,
    MoveDown,
    Invoke,
    Back,
    Home,
    Refresh,
    ScrollUp,
    ScrollDown,
}

/// Result of mapping one key: a primitive or a direct item index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Primitive(MenuPrimitive),
    Item(usize),
}

/// Actions the session knows how to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    NoAction,
    Reboot,
    Shutdown,
    RebootBootloader,
    RebootRecovery,
    ApplyUpdate,
    WipeData,
    WipeCache,
    WipeSystem,
    MountSystem,
    ViewRecoveryLogs,
}

const MAIN_MENU: &[(&str, BuiltinAction)] = &[
    ("Reboot system now", BuiltinAction::Reboot),
    ("Reboot to bootloader", BuiltinAction::RebootBootloader),
    ("Reboot to recovery", BuiltinAction::RebootRecovery),
    ("Apply update", BuiltinAction::ApplyUpdate),
    ("Wipe data/factory reset", BuiltinAction::WipeData),
    ("Wipe cache partition", BuiltinAction::WipeCache),
    ("Wipe system partition", BuiltinAction::WipeSystem),
    ("Mount /system", BuiltinAction::MountSystem),
    ("View recovery logs", BuiltinAction::ViewRecoveryLogs),
    ("Power off", BuiltinAction::Shutdown),
];

/// Device-family specific behavior.
pub trait Device: Send {
    fn name(&self) -> &'static str;

    /// Map a key press; `text_visible` tells whether the menu is on screen.
    fn handle_menu_key(&self, key: u32, text_visible: bool) -> KeyAction;

    fn menu_items(&self) -> Vec<String> {
        MAIN_MENU.iter().map(|(label, _)| (*label).to_string()).collect()
    }

    fn invoke_menu_item(&self, index: usize) -> BuiltinAction {
        MAIN_MENU
            .get(index)
            .map_or(BuiltinAction::NoAction, |(_, action)| *action)
    }

    /// Return to the top-level menu.
    fn go_home(&mut self) {}

    fn start_recovery(&mut self) {}

    fn pre_wipe_data(&mut self) -> bool {
        true
    }

    fn post_wipe_data(&mut self) -> bool {
        true
    }
}

/// Devices with a full navigation key set. Digit keys pick items directly.
#[derive(Debug, Default)]
pub struct DefaultDevice {
    home_requests: usize,
}

impl DefaultDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn home_requests(&self) -> usize {
        self.home_requests
    }
}

impl Device for DefaultDevice {
    fn name(&self) -> &'static str {
        "default"
    }

    fn handle_menu_key(&self, key: u32, _text_visible: bool) -> KeyAction {
        let primitive = match key {
            KEY_DOWN | KEY_VOLUMEDOWN => MenuPrimitive::MoveDown,
            KEY_UP | KEY_VOLUMEUP => MenuPrimitive::MoveUp,
            KEY_PAGEUP => MenuPrimitive::ScrollUp,
            KEY_PAGEDOWN => MenuPrimitive::ScrollDown,
            KEY_ENTER | KEY_POWER => MenuPrimitive::Invoke,
            KEY_BACK => MenuPrimitive::Back,
            KEY_HOME | KEY_HOMEPAGE => MenuPrimitive::Home,
            KEY_REFRESH => MenuPrimitive::Refresh,
            KEY_1..=KEY_9 => return KeyAction::Item((key - KEY_1) as usize),
            _ => MenuPrimitive::NoAction,
        };
        KeyAction::Primitive(primitive)
    }

    fn go_home(&mut self) {
        self.home_requests += 1;
    }
}

/// Handsets with only volume and power keys; keys act only while text is shown.
#[derive(Debug, Default)]
pub struct KeypadDevice;

impl Device for KeypadDevice {
    fn name(&self) -> &'static str {
        "keypad"
    }

    fn handle_menu_key(&self, key: u32, text_visible: bool) -> KeyAction {
        if !text_visible {
            return KeyAction::Primitive(MenuPrimitive::NoAction);
        }
        KeyAction::Primitive(match key {
            KEY_VOLUMEUP => MenuPrimitive::MoveUp,
            KEY_VOLUMEDOWN => MenuPrimitive::MoveDown,
            KEY_POWER => MenuPrimitive::Invoke,
            _ => MenuPrimitive::NoAction,
        })
    }
}

/// Product families that ship without navigation keys.
const KEYPAD_PRODUCTS: &[&str] = &["sailfish", "marlin", "walleye", "taimen", "blueline"];

/// Pick the device variant for `product` (`ro.build.product`).
#[must_use]
pub fn make_device(product: &str) -> Box<dyn Device> {
    if KEYPAD_PRODUCTS
        .iter()
        .any(|family| product.eq_ignore_ascii_case(family))
    {
        Box::new(KeypadDevice)
    } else {
        Box::new(DefaultDevice::new())
    }
}
