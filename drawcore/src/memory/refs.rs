// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The set of BOs a batch depends on.

use super::{Bo, BoAccess};
use foldhash::HashMap;
use std::{num::NonZero, sync::Arc};

/// One BO referenced by a submission.
#[derive(Clone, Debug)]
pub struct BoReference {
    pub bo: Arc<Bo>,
    pub access: BoAccess,
}

/// References collected while recording a batch, deduplicated by BO.
///
/// Referencing a BO again widens its access class to the join of all requested classes. The
/// references keep the BOs alive until the set is cleared.
#[derive(Debug, Default)]
pub struct BoRefSet {
    refs: Vec<BoReference>,
    index: HashMap<NonZero<u64>, usize>,
}

impl BoRefSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// References `bo` with `access`.
    pub fn add(&mut self, bo: &Arc<Bo>, access: BoAccess) {
        match self.index.get(&bo.id()) {
            Some(&i) => self.refs[i].access |= access,
            None => {
                self.index.insert(bo.id(), self.refs.len());
                self.refs.push(BoReference {
                    bo: bo.clone(),
                    access,
                });
            }
        }
    }

    /// Returns the access class `bo` is referenced with.
    pub fn get(&self, bo: &Bo) -> Option<BoAccess> {
        self.index.get(&bo.id()).map(|&i| self.refs[i].access)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[BoReference] {
        &self.refs
    }

    pub fn clear(&mut self) {
        self.refs.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::BoRefSet;
    use crate::memory::{host::HostBoService, Bo, BoAccess, BoFlags, BoService, DeviceAlignment};
    use std::sync::Arc;

    #[test]
    fn access_widens_to_join() {
        let service: Arc<dyn BoService> = Arc::new(HostBoService::new());
        let a = Bo::new(&service, 16, DeviceAlignment::MIN, BoFlags::empty()).unwrap();
        let b = Bo::new(&service, 16, DeviceAlignment::MIN, BoFlags::empty()).unwrap();
        let mut refs = BoRefSet::new();

        refs.add(&a, BoAccess::READ);
        refs.add(&b, BoAccess::WRITE);
        refs.add(&a, BoAccess::READ);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs.get(&a), Some(BoAccess::READ));

        refs.add(&a, BoAccess::WRITE);
        assert_eq!(refs.get(&a), Some(BoAccess::RW));
        assert_eq!(refs.get(&b), Some(BoAccess::WRITE));

        refs.add(&a, BoAccess::READ);
        assert_eq!(refs.get(&a), Some(BoAccess::RW));
    }

    #[test]
    fn clear_drops_references() {
        let service = Arc::new(HostBoService::new());
        let dyn_service: Arc<dyn BoService> = service.clone();
        let mut refs = BoRefSet::new();

        refs.add(
            &Bo::new(&dyn_service, 16, DeviceAlignment::MIN, BoFlags::empty()).unwrap(),
            BoAccess::READ,
        );
        assert_eq!(service.live_bo_count(), 1);

        refs.clear();
        assert!(refs.is_empty());
        assert_eq!(service.live_bo_count(), 0);
    }
}
