//! Standing registrations for remote operation requests.

use crate::operation::OperationSpec;
use crate::protocol::{AppId, ClientId, OperationType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Listener {
    pub(crate) client: ClientId,
    pub(crate) operation: OperationType,
    pub(crate) app_id: AppId,
}

impl Listener {
    pub(crate) fn matches(&self, spec: &OperationSpec) -> bool {
        self.operation == spec.operation && self.app_id == spec.app_id
    }
}
