pub(crate) mod agents;
pub(crate) mod approvals;
pub(crate) mod evidence_manifests;
pub(crate) mod experiments;
pub(crate) mod incidents;
pub(crate) mod rooms;
pub(crate) mod runs;
pub(crate) mod scorecards;
pub(crate) mod tool_calls;
pub(crate) mod workspaces;
