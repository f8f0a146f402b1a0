//! Ready-made prompts for people who would rather pick than write

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub prompt: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "Lo-fi Chill",
        prompt: "Relaxing lo-fi hip hop with jazzy piano, soft drums, and vinyl crackle",
    },
    Preset {
        name: "Epic Orchestral",
        prompt: "Powerful orchestral score with dramatic strings, brass, and epic percussion",
    },
    Preset {
        name: "Electronic Dance",
        prompt: "High-energy electronic dance music with pulsing synths and driving beats",
    },
    Preset {
        name: "Ambient Dreams",
        prompt: "Ethereal ambient soundscape with soft pads, gentle melodies, \
                 and atmospheric textures",
    },
    Preset {
        name: "Rock Energy",
        prompt: "Energetic rock music with electric guitars, powerful drums, and bass",
    },
    Preset {
        name: "Jazz Vibes",
        prompt: "Smooth jazz with saxophone, piano, walking bass, and brushed drums",
    },
    Preset {
        name: "Trap Beats",
        prompt: "Hard-hitting trap music with 808 bass, hi-hats, and aggressive synths",
    },
    Preset {
        name: "Acoustic Folk",
        prompt: "Warm acoustic folk music with guitar, soft vocals, and natural instruments",
    },
];

fn slug(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look a preset up by name, ignoring case, spaces and punctuation
pub fn find(name: &str) -> Option<&'static Preset> {
    let wanted = slug(name);
    PRESETS.iter().find(|preset| slug(preset.name) == wanted)
}
