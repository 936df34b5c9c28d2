//! MQTT topic naming.
//!
//! ```text
//! {prefix}/availability
//! {prefix}/coils/{register}
//! {prefix}/coils/{register}/set
//! {discovery_prefix}/{component}/{device_id}/{register}/config
//! ```

/// Default topic prefix for register values and commands.
pub const DEFAULT_PREFIX: &str = "nibe";

/// Default prefix for discovery announcements.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Builder for the bridge's MQTT topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    discovery_prefix: String,
}

impl Topics {
    /// Create a topic builder.
    pub fn new(prefix: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            discovery_prefix: discovery_prefix.into(),
        }
    }

    /// The value/command prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The discovery prefix.
    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    /// Availability topic.
    ///
    /// # Example
    /// ```
    /// use heatpump_common::topics::Topics;
    ///
    /// let topics = Topics::new("nibe", "homeassistant");
    /// assert_eq!(topics.availability(), "nibe/availability");
    /// ```
    pub fn availability(&self) -> String {
        format!("{}/availability", self.prefix)
    }

    /// Value topic for a register.
    ///
    /// # Example
    /// ```
    /// use heatpump_common::topics::Topics;
    ///
    /// let topics = Topics::new("nibe", "homeassistant");
    /// assert_eq!(topics.value("bt1-outdoor-temperature-40004"), "nibe/coils/bt1-outdoor-temperature-40004");
    /// ```
    pub fn value(&self, register: &str) -> String {
        format!("{}/coils/{}", self.prefix, register)
    }

    /// Command topic for a register.
    pub fn command(&self, register: &str) -> String {
        format!("{}/coils/{}/set", self.prefix, register)
    }

    /// Subscription filter matching every command topic.
    ///
    /// # Example
    /// ```
    /// use heatpump_common::topics::Topics;
    ///
    /// let topics = Topics::new("nibe", "homeassistant");
    /// assert_eq!(topics.command_filter(), "nibe/coils/+/set");
    /// ```
    pub fn command_filter(&self) -> String {
        format!("{}/coils/+/set", self.prefix)
    }

    /// Discovery topic for a register announcement.
    pub fn discovery(&self, component: &str, device_id: &str, register: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix, component, device_id, register
        )
    }

    /// Extract the register name from a command topic.
    ///
    /// Returns `None` if the topic is not a command topic under this prefix.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let name = rest.strip_prefix("/coils/")?.strip_suffix("/set")?;

        if name.is_empty() || name.contains('/') {
            return None;
        }

        Some(name)
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_DISCOVERY_PREFIX)
    }
}

/// Turn free text into a lowercase, dash-separated identifier.
///
/// # Example
/// ```
/// use heatpump_common::topics::slugify;
///
/// assert_eq!(slugify("Nibe tcp://192.168.1.3:502-1"), "nibe-tcp-192-168-1-3-502-1");
/// ```
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
