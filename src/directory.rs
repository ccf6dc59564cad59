// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Provider-to-user resolution.
//!
//! A provider record and the user owning its wallet are distinct
//! identities. This trait is the single source of truth for the mapping;
//! settlement, reviews, reports, and badge handling all resolve through it
//! and nothing else equates the two id spaces.

use crate::base::{ProviderId, UserId};
use crate::error::CoreError;
use dashmap::DashMap;

/// Resolves the wallet-owning user behind a provider record.
pub trait ProviderDirectory: Send + Sync {
    /// # Errors
    ///
    /// [`CoreError::ProviderNotFound`] when the provider id is unknown.
    fn resolve_provider_user_id(&self, provider_id: ProviderId) -> Result<UserId, CoreError>;
}

/// In-memory [`ProviderDirectory`].
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    owners: DashMap<ProviderId, UserId>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the owning user for a provider.
    pub fn register(&self, provider_id: ProviderId, user_id: UserId) {
        self.owners.insert(provider_id, user_id);
    }
}

impl ProviderDirectory for MemoryDirectory {
    fn resolve_provider_user_id(&self, provider_id: ProviderId) -> Result<UserId, CoreError> {
        self.owners
            .get(&provider_id)
            .map(|u| *u)
            .ok_or(CoreError::ProviderNotFound)
    }
}
