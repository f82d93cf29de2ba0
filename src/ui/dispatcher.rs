//! Menu selection: turns input events into one decision.

#![allow(missing_docs)]

use crate::ui::device::{Device, KeyAction, MenuPrimitive};
use crate::ui::menu::{Highlight, MenuModel};
use crate::ui::screen::{InputEvent, RecoveryUi, TouchTarget};

/// Rows moved by one scroll step.
const SCROLL_STEP: isize = 5;

/// Outcome of one menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Item(usize),
    Back,
    Home,
    Refresh,
    /// Input timed out on a screen whose text was never shown.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    AwaitingInput,
    ActionInvoked(usize),
    Terminal(MenuChoice),
}

/// Present `menu` and block until a choice is made.
///
/// Timeouts end the menu only when text was never visible, since nobody is
/// watching; otherwise the menu keeps waiting. Direct item codes from the
/// device are ignored on `menu_only` menus, and Refresh is swallowed unless
/// the menu is refreshable. Home also asks the device to return to the top.
pub fn get_menu_selection(
    ui: &mut dyn RecoveryUi,
    device: &mut dyn Device,
    menu: &MenuModel,
    initial: usize,
) -> MenuChoice {
    let mut highlight = Highlight::new(initial, menu.len());
    let mut state = DispatchState::Idle;

    let choice = loop {
        state = match state {
            DispatchState::Idle => {
                ui.flush_keys();
                ui.start_menu(menu, initial);
                DispatchState::AwaitingInput
            }
            DispatchState::AwaitingInput => {
                let action = match ui.wait_input_event() {
                    InputEvent::Timeout => {
                        if ui.was_text_ever_visible() {
                            continue;
                        }
                        break MenuChoice::TimedOut;
                    }
                    InputEvent::Touch { x, y } => match ui.resolve_touch(x, y) {
                        TouchTarget::Item(index) => {
                            highlight.set(index);
                            KeyAction::Primitive(MenuPrimitive::Invoke)
                        }
                        TouchTarget::Primitive(primitive) => KeyAction::Primitive(primitive),
                    },
                    InputEvent::Key(key) => device.handle_menu_key(key, ui.is_text_visible()),
                };
                apply(action, menu, &mut highlight, ui)
            }
            DispatchState::ActionInvoked(index) => DispatchState::Terminal(MenuChoice::Item(index)),
            DispatchState::Terminal(choice) => break choice,
        };
    };

    ui.end_menu();
    if choice == MenuChoice::Home {
        device.go_home();
    }
    choice
}

fn apply(
    action: KeyAction,
    menu: &MenuModel,
    highlight: &mut Highlight,
    ui: &mut dyn RecoveryUi,
) -> DispatchState {
    let primitive = match action {
        KeyAction::Item(index) if !menu.menu_only => return DispatchState::ActionInvoked(index),
        KeyAction::Item(_) => return DispatchState::AwaitingInput,
        KeyAction::Primitive(primitive) => primitive,
    };
    match primitive {
        MenuPrimitive::MoveUp => highlight.up(),
        MenuPrimitive::MoveDown => highlight.down(),
        MenuPrimitive::ScrollUp => highlight.scroll(-SCROLL_STEP),
        MenuPrimitive::ScrollDown => highlight.scroll(SCROLL_STEP),
        MenuPrimitive::Invoke => {
            return match highlight.current() {
                Some(index) => DispatchState::ActionInvoked(index),
                None => DispatchState::Terminal(MenuChoice::Back),
            };
        }
        MenuPrimitive::Back => return DispatchState::Terminal(MenuChoice::Back),
        MenuPrimitive::Home => return DispatchState::Terminal(MenuChoice::Home),
        MenuPrimitive::Refresh if menu.refreshable => {
            return DispatchState::Terminal(MenuChoice::Refresh);
        }
        MenuPrimitive::Refresh | MenuPrimitive::NoAction => {
            return DispatchState::AwaitingInput;
        }
    }
    ui.select_menu(highlight.current());
    DispatchState::AwaitingInput
}
