//! Voice entitlements.
//!
//! Voices are grouped into three nested allow-lists: every basic voice is
//! available to creator subscribers, and every creator voice to premium ones.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Voice used when a continuation request does not pick one (Sam).
pub const DEFAULT_VOICE_ID: &str = "ZRwrL4id6j1HPGFkeCzO";

const BASIC_VOICES: &[&str] = &[
    DEFAULT_VOICE_ID,
    "NFG5qt843uXKj4pFvR7C",
    "CBHdTdZwkV4jYoCyMV1B",
    "gYr8yTP0q4RkX1HnzQfX",
    "LXVY607YcjqxFS3mcult",
    "ZF6FPAbjXT4488VcRRnw",
];

const CREATOR_VOICES: &[&str] = &[
    "ZkXXWlhJO3CtSXof2ujN",
    "JBFqnCBsd6RMkjVDRZzb",
    "i4CzbCVWoqvD0P1QJCUL",
    "7p1Ofvcwsv7UBPoFNcpI",
    "JEAgwU0JZFGxl2KjC3if",
    "FMQtISLdv5RvjpHBgf60",
    "hKUnzqLzU3P9IVhYHREu",
    "rCuVrCHOUMY3OwyJBJym",
    "LtPsVjX1k0Kl4StEMZPK",
    "luVEyhT3CocLZaLBps8v",
];

const PREMIUM_VOICES: &[&str] = &[
    "41534e16-2966-4c6b-9670-111411def906",
    "NYC9WEgkq1u4jiqBseQ9",
    "L0Dsvb3SLTyegXwtm47J",
    "kPzsL2i3teMYv0FxEYQ6",
    "PDJZDHevWkwdKwWFKj34",
    "ngiiW8FFLIdMew1cqwSB",
    "gAMZphRyrWJnLMDnom6H",
    "qNkzaJoHLLdpvgh5tISm",
    "FVQMzxJGPUBtfz1Azdoy",
    "L5Oo1OjjHdbIvJDQFgmN",
    "vfaqCOvlrKi4Zp7C2IAm",
    "eVItLK1UvXctxuaRV2Oq",
    "txtf1EDouKke753vN8SL",
    "IHngRooVccHyPqB4uQkG",
    "AnvlJBAqSLDzEevYr9Ap",
    "NOpBlnGInO9m6vDvFkFC",
    "c99d36f3-5ffd-4253-803a-535c1bc9c306",
    "BY77WcifAQZkoI7EftFd",
    "siw1N9V8LmYeEWKyWBxv",
    "BZc8d1MPTdZkyGbE9Sin",
    "t3hJ92dgZhDVtsff084B",
    "pO3rCaEbT3xVc0h3pPoG",
    "cccc21e8-5bcf-4ff0-bc7f-be4e40afc544",
    "50d6beb4-80ea-4802-8387-6c948fe84208",
    "A8rwEcJwudjohY1gjPfa",
    "236bb1fb-dc41-4a2b-84d6-d22d2a2aaae1",
    "JoYo65swyP8hH6fVMeTO",
    "224126de-034c-429b-9fde-71031fba9a59",
    "8f091740-3df1-4795-8bd9-dc62d88e5131",
    "185c2177-de10-4848-9c0a-ae6315ac1493",
    "gbLy9ep70G3JW53cTzFC",
    "LT7npgnEogysurF7U8GR",
    "bf0a246a-8642-498a-9950-80c35e9276b5",
    "sTgjlXyTKe3nwbzzjDAZ",
    "d7862948-75c3-4c7c-ae28-2959fe166f49",
    "bn5HJAJ1igu4dFplCXkQ",
    "mLJVsC2pwqCmmrBUAzg6",
    "flHkNRp1BlvT73UL6gyz",
    "INDKfphIpZiLCUiXae4o",
    "nbk2esDn4RRk4cVDdoiE",
];

/// Voice entitlement tier. Ordered: `Basic < Creator < Premium`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum VoiceTier {
    Basic,
    Creator,
    Premium,
}

impl VoiceTier {
    /// Tier unlocked by a subscription plan.
    pub fn for_plan(plan: PlanTier) -> Self {
        match plan {
            PlanTier::Free => VoiceTier::Basic,
            PlanTier::Creator => VoiceTier::Creator,
            PlanTier::Pro | PlanTier::Growth => VoiceTier::Premium,
        }
    }

    /// The lowest tier that contains `voice_id`, if it is a known voice.
    pub fn of_voice(voice_id: &str) -> Option<Self> {
        if BASIC_VOICES.contains(&voice_id) {
            Some(VoiceTier::Basic)
        } else if CREATOR_VOICES.contains(&voice_id) {
            Some(VoiceTier::Creator)
        } else if PREMIUM_VOICES.contains(&voice_id) {
            Some(VoiceTier::Premium)
        } else {
            None
        }
    }

    /// Whether this tier may use `voice_id`. Unknown voices are never allowed.
    pub fn allows(&self, voice_id: &str) -> bool {
        VoiceTier::of_voice(voice_id).is_some_and(|required| required <= *self)
    }

    /// All voices available to this tier.
    pub fn voices(&self) -> Vec<&'static str> {
        let mut voices: Vec<&'static str> = BASIC_VOICES.to_vec();
        if *self >= VoiceTier::Creator {
            voices.extend_from_slice(CREATOR_VOICES);
        }
        if *self >= VoiceTier::Premium {
            voices.extend_from_slice(PREMIUM_VOICES);
        }
        voices
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceTier::Basic => "basic",
            VoiceTier::Creator => "creator",
            VoiceTier::Premium => "premium",
        }
    }
}
