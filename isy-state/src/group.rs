//! Scene groups
//!
//! A scene's status is derived from its members: on (255) while any member is
//! on, off (0) otherwise. Writing the status from the application commands
//! the scene through [`SceneControl`].

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::nodes::Nodes;
use crate::property::{Property, Subscription, WeakProperty};

/// Status value of a scene that is on
pub const SCENE_ON: i32 = 255;
/// Status value of a scene that is off
pub const SCENE_OFF: i32 = 0;

/// Commands a scene on the controller.
///
/// Implemented by whatever issues requests against the controller's REST or
/// SOAP API.
pub trait SceneControl: Send + Sync {
    fn scene_on(&self, scene: &str) -> Result<()>;
    fn scene_off(&self, scene: &str) -> Result<()>;
}

/// A scene and the member nodes its status follows.
pub struct Group {
    id: String,
    members: Vec<String>,
    status: Property<i32>,
    control: Arc<dyn SceneControl>,
    _member_subscriptions: Vec<Subscription>,
}

impl Group {
    /// Track scene `id` over `members`, registering unknown members in `nodes`.
    pub fn new(
        id: impl Into<String>,
        members: Vec<String>,
        nodes: &Nodes,
        control: Arc<dyn SceneControl>,
    ) -> Self {
        let id = id.into();
        let member_statuses: Vec<Property<i32>> = members
            .iter()
            .map(|member| nodes.register(member.as_str(), SCENE_OFF))
            .collect();

        let status = Property::new(aggregate(&member_statuses));
        let _member_subscriptions = subscribe_members(&status, &member_statuses);

        let reporter_status = status.downgrade();
        let reporter_control = Arc::clone(&control);
        let scene = id.clone();
        status.set_reporter(move |value| {
            report_status(&scene, *value, &reporter_status, reporter_control.as_ref());
        });

        Self {
            id,
            members,
            status,
            control,
            _member_subscriptions,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Handle to the scene status, for reading or subscribing.
    pub fn status(&self) -> Property<i32> {
        self.status.clone()
    }

    pub fn value(&self) -> i32 {
        self.status.get()
    }

    pub fn is_on(&self) -> bool {
        self.value() > SCENE_OFF
    }

    /// Write the scene status and command the scene to match.
    ///
    /// Any positive value turns the scene on; the stored status is cleaned
    /// to 255 or 0.
    pub fn set_status(&self, value: i32) -> bool {
        self.status.update(value, false, false)
    }

    /// Turn on every node in the scene.
    pub fn on(&self) -> Result<()> {
        command(&self.id, SCENE_ON, self.control.as_ref())
    }

    /// Turn off every node in the scene.
    pub fn off(&self) -> Result<()> {
        command(&self.id, SCENE_OFF, self.control.as_ref())
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.status.clear_reporter();
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("members", &self.members)
            .field("status", &self.status.get())
            .finish()
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group({})", self.id)
    }
}

fn aggregate(members: &[Property<i32>]) -> i32 {
    if members.iter().any(|member| member.get() > 0) {
        SCENE_ON
    } else {
        SCENE_OFF
    }
}

fn subscribe_members(status: &Property<i32>, members: &[Property<i32>]) -> Vec<Subscription> {
    let weak_members: Vec<WeakProperty<i32>> = members.iter().map(Property::downgrade).collect();

    members
        .iter()
        .map(|member| {
            let status = status.downgrade();
            let weak_members = weak_members.clone();
            member.subscribe(move |_| {
                let Some(status) = status.upgrade() else {
                    return;
                };
                let members: Vec<Property<i32>> =
                    weak_members.iter().filter_map(WeakProperty::upgrade).collect();
                status.update(aggregate(&members), true, true);
            })
        })
        .collect()
}

fn report_status(scene: &str, value: i32, status: &WeakProperty<i32>, control: &dyn SceneControl) {
    let clean = if value > 0 { SCENE_ON } else { SCENE_OFF };
    if value != clean {
        if let Some(status) = status.upgrade() {
            status.update(clean, true, true);
        }
    }

    // Failures are logged; the reporter has no caller to return them to
    let _ = command(scene, clean, control);
}

fn command(scene: &str, value: i32, control: &dyn SceneControl) -> Result<()> {
    let (result, verb) = if value > 0 {
        (control.scene_on(scene), "on")
    } else {
        (control.scene_off(scene), "off")
    };

    match &result {
        Ok(()) => tracing::info!("Turned {} scene {}", verb, scene),
        Err(e) => tracing::warn!("Could not turn {} scene {}: {}", verb, scene, e),
    }
    result
}
