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

/// Number of hash bytes that make up a component id.
pub const ID_SIZE: usize = 16;

/// Length of a SHA-256 digest in bytes.
pub const SHA256_LENGTH: usize = 32;

/// Converts a hex string into a component id by mapping every nibble `v` to
/// the letter `'a' + v`. Characters that are not hex digits map to `'a'`.
pub fn generate_id_from_hex(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            let nibble = c.to_digit(16).unwrap_or(0) as u8;
            char::from(b'a' + nibble)
        })
        .collect()
}

/// Derives the component id from the hex form of a SHA-256 hash. Only the
/// first `ID_SIZE` bytes, i.e. `ID_SIZE * 2` hex characters, contribute.
pub fn generate_id(sha2hash_hex: &str) -> String {
    let prefix: String = sha2hash_hex.chars().take(ID_SIZE * 2).collect();
    generate_id_from_hex(&prefix)
}
