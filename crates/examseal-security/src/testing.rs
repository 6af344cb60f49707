// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared key material for tests. RSA generation is slow, so each test binary
// generates at most two key pairs.

use std::sync::OnceLock;

use crate::keystore::KeyMaterial;

static PRIMARY: OnceLock<KeyMaterial> = OnceLock::new();
static SECONDARY: OnceLock<KeyMaterial> = OnceLock::new();

/// The key pair most tests sign, wrap and seal with.
pub fn shared_key_material() -> &'static KeyMaterial {
    PRIMARY.get_or_init(|| KeyMaterial::generate(2048).expect("generate test key pair"))
}

/// An unrelated key pair, for cross-key rejection tests.
pub fn other_key_material() -> &'static KeyMaterial {
    SECONDARY.get_or_init(|| KeyMaterial::generate(2048).expect("generate second key pair"))
}
