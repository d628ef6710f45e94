// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deployment resource mapper: hands nodes started by deployments to the
//! virtual nodes that asked for them.

mod node_provider;
pub use self::node_provider::{NodeProvider, NodeProviderRegistry};

mod virtual_node;
pub use self::virtual_node::{
    ContractRef, DeployedNode, VirtualNode, VirtualNodeContract, VirtualNodeEvent,
};

mod node_mapper;
pub use self::node_mapper::{NodeMapper, NodeRegistrationListener, NodesRegistered};
