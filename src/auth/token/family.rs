//! Rotation-chain identifiers shared by every token minted from one sign-in.

// self
use crate::{_prelude::*, auth::id::def_uuid};

def_uuid! {
	SessionFamily,
	"Identifies a rotation chain; every token rotated from the same sign-in shares it.",
	"SessionFamily"
}
