// Copyright 2024 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use component_error::{Error, ResultExt, error_if, make_input_err};

/// A dotted numeric version such as `96.0.4664.1`.
///
/// Versions compare component by component. Missing trailing components
/// count as zero, so `1.0` and `1.0.0` are equal.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u32>,
}

impl Version {
    pub fn new(components: Vec<u32>) -> Result<Self, Error> {
        error_if!(components.is_empty(), "A version needs at least one component");
        Ok(Self { components })
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    pub fn major(&self) -> u32 {
        self.components[0]
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut components = Vec::new();
        for (i, piece) in s.split('.').enumerate() {
            error_if!(
                piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()),
                "Invalid version component '{piece}' in '{s}'"
            );
            // Leading zeros are only rejected on the first component.
            error_if!(
                i == 0 && piece.len() > 1 && piece.starts_with('0'),
                "Invalid leading zero in version '{s}'"
            );
            components.push(
                piece
                    .parse::<u32>()
                    .err_tip(|| format!("Version component out of range in '{s}'"))?,
            );
        }
        if components.is_empty() {
            return Err(make_input_err!("Empty version string"));
        }
        Ok(Self { components })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let lhs = self.components.get(i).copied().unwrap_or(0);
            let rhs = other.components.get(i).copied().unwrap_or(0);
            match lhs.cmp(&rhs) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}
