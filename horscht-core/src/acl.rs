// ABOUTME: Per-command access control with additive room and user allow-lists.
// ABOUTME: A command is allowed if the room is allowed OR the user is explicitly allowed.

use std::collections::{HashMap, HashSet};

/// Allow-lists for one command. `None` means no restriction on that axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRule {
    pub rooms: Option<HashSet<String>>,
    pub users: Option<HashSet<String>>,
}

impl AccessRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rooms = Some(rooms.into_iter().map(Into::into).collect());
        self
    }

    pub fn users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = Some(users.into_iter().map(Into::into).collect());
        self
    }

    /// True if neither axis is configured
    pub fn is_unrestricted(&self) -> bool {
        self.rooms.is_none() && self.users.is_none()
    }

    /// Evaluate this rule.
    ///
    /// Without a room list the command is room-public. Without a user list
    /// the user axis grants nothing. The two grants are OR-ed.
    pub fn allows(&self, user_id: &str, room_address: &str) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let room_allowed = match &self.rooms {
            None => true,
            Some(rooms) => rooms.contains(room_address),
        };
        let user_allowed = match &self.users {
            None => false,
            Some(users) => users.contains(user_id),
        };
        room_allowed || user_allowed
    }
}

/// Access rules keyed by lowercased command name.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    rules: HashMap<String, AccessRule>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rule for a command, replacing any previous one.
    pub fn set_rule(&mut self, command: &str, rule: AccessRule) {
        if rule.is_unrestricted() {
            self.rules.remove(&command.to_lowercase());
        } else {
            self.rules.insert(command.to_lowercase(), rule);
        }
    }

    pub fn rule(&self, command: &str) -> Option<&AccessRule> {
        self.rules.get(&command.to_lowercase())
    }

    /// Decide whether `user_id` may run `command` in the room at `room_address`.
    ///
    /// `room_address` is the room's canonical alias if it has one, else its id
    /// (see `RoomInfo::address`). Commands without any rule are allowed.
    pub fn allowed(&self, command: &str, user_id: &str, room_address: &str) -> bool {
        match self.rule(command) {
            Some(rule) => rule.allows(user_id, room_address),
            None => true,
        }
    }
}
