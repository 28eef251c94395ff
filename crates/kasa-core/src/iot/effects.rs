//! Built-in light strip effects.

use serde_json::{json, Value};

pub const EFFECT_NAMES: [&str; 17] = [
    "Aurora",
    "Bubbling Cauldron",
    "Candy Cane",
    "Christmas",
    "Flicker",
    "Grandma's Christmas Lights",
    "Hanukkah",
    "Haunted Mansion",
    "Icicle",
    "Lightning",
    "Ocean",
    "Rainbow",
    "Raindrop",
    "Spring",
    "Sunrise",
    "Sunset",
    "Valentines",
];

/// Keys every built-in effect carries, merged over the effect's own body.
fn built_in(name: &str, id: &str, brightness: u8, segments: &[u8], body: Value) -> Value {
    let mut effect = json!({
        "custom": 0,
        "id": id,
        "brightness": brightness,
        "name": name,
        "segments": segments,
        "expansion_strategy": 1,
        "enable": 1,
    });
    if let (Some(effect), Value::Object(body)) = (effect.as_object_mut(), body) {
        effect.extend(body);
    }
    effect
}

const SUNRISE_STEPS: [[u16; 3]; 16] = [
    [0, 100, 5],
    [0, 100, 5],
    [10, 100, 6],
    [15, 100, 7],
    [20, 100, 8],
    [20, 100, 10],
    [30, 100, 12],
    [30, 95, 15],
    [30, 90, 20],
    [30, 80, 25],
    [30, 75, 30],
    [30, 70, 40],
    [30, 60, 50],
    [30, 50, 60],
    [30, 20, 70],
    [30, 0, 100],
];

/// Payload for `set_lighting_effect`, or `None` for an unknown name.
pub fn effect(name: &str) -> Option<Value> {
    let effect = match name {
        "Aurora" => built_in(
            name,
            "xqUxDhbAhNLqulcuRMyPBmVGyqqvjAcq",
            100,
            &[0],
            json!({
                "type": "sequence",
                "duration": 0,
                "transition": 1500,
                "direction": 4,
                "spread": 7,
                "repeat_times": 0,
                "sequence": [[120, 100, 100], [240, 100, 100], [260, 100, 100], [280, 100, 100]]
            }),
        ),
        "Bubbling Cauldron" => built_in(
            name,
            "tIwTRQBqJpeNKbrtBMFCgkdPTbAQGfRP",
            100,
            &[0],
            json!({
                "type": "random",
                "hue_range": [100, 270],
                "saturation_range": [80, 100],
                "brightness_range": [50, 100],
                "duration": 0,
                "transition": 200,
                "init_states": [[270, 100, 100]],
                "fadeoff": 1000,
                "random_seed": 24,
                "backgrounds": [[270, 40, 50]]
            }),
        ),
        "Candy Cane" => built_in(
            name,
            "HCOttllMkNffeHjEOLEgrFJjbzQHoxEJ",
            100,
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
            json!({
                "type": "sequence",
                "duration": 700,
                "transition": 500,
                "direction": 1,
                "spread": 1,
                "repeat_times": 0,
                "sequence": [
                    [0, 0, 100], [0, 0, 100], [360, 81, 100], [0, 0, 100],
                    [0, 0, 100], [360, 81, 100], [360, 81, 100], [0, 0, 100],
                    [0, 0, 100], [360, 81, 100], [360, 81, 100], [360, 81, 100],
                    [360, 81, 100], [0, 0, 100], [0, 0, 100], [360, 81, 100]
                ]
            }),
        ),
        "Christmas" => built_in(
            name,
            "bwTatyinOUajKrDwzMmqxxJdnInQUgvM",
            100,
            &[0],
            json!({
                "type": "random",
                "hue_range": [136, 146],
                "saturation_range": [90, 100],
                "brightness_range": [50, 100],
                "duration": 5000,
                "transition": 0,
                "init_states": [[136, 0, 100]],
                "fadeoff": 2000,
                "random_seed": 100,
                "backgrounds": [[136, 98, 75], [136, 0, 0], [350, 0, 100], [350, 97, 94]]
            }),
        ),
        "Flicker" => built_in(
            name,
            "bCTItKETDFfrKANolgldxfgOakaarARs",
            100,
            &[1],
            json!({
                "type": "random",
                "hue_range": [30, 40],
                "saturation_range": [100, 100],
                "brightness_range": [50, 100],
                "duration": 0,
                "transition": 0,
                "transition_range": [375, 500],
                "init_states": [[30, 81, 80]]
            }),
        ),
        "Grandma's Christmas Lights" => built_in(
            name,
            "xxzCwYzJLrTnFVjaZnXSOdXIQANuNvrE",
            100,
            &[0],
            json!({
                "type": "sequence",
                "duration": 5000,
                "transition": 100,
                "direction": 1,
                "spread": 1,
                "repeat_times": 0,
                "sequence": [
                    [30, 100, 100], [0, 0, 0], [240, 100, 100], [0, 0, 0],
                    [0, 100, 100], [0, 0, 0], [120, 100, 100], [0, 0, 0],
                    [300, 100, 100], [0, 0, 0], [60, 100, 100], [0, 0, 0]
                ]
            }),
        ),
        "Hanukkah" => built_in(
            name,
            "CdLeIgiKcQrLKMINRPTMbylATulQewLD",
            100,
            &[1],
            json!({
                "type": "random",
                "hue_range": [200, 210],
                "saturation_range": [0, 100],
                "brightness_range": [50, 100],
                "duration": 1500,
                "transition": 0,
                "transition_range": [400, 500],
                "init_states": [[35, 81, 80]]
            }),
        ),
        "Haunted Mansion" => built_in(
            name,
            "oJnFHsVQzFUTeIOBAhMRfVeujmSauhjJ",
            80,
            &[80],
            json!({
                "type": "random",
                "hue_range": [45, 45],
                "saturation_range": [10, 10],
                "brightness_range": [0, 80],
                "duration": 0,
                "transition": 0,
                "transition_range": [50, 1500],
                "init_states": [[45, 10, 100]],
                "fadeoff": 200,
                "random_seed": 1,
                "backgrounds": [[45, 10, 100]]
            }),
        ),
        "Icicle" => built_in(
            name,
            "joqVjlaTsgzmuQQBAlHRkkPAqkBUiqeb",
            70,
            &[0],
            json!({
                "type": "sequence",
                "duration": 0,
                "transition": 400,
                "direction": 4,
                "spread": 3,
                "repeat_times": 0,
                "sequence": [
                    [190, 100, 70], [190, 100, 70], [190, 30, 50], [190, 100, 70], [190, 100, 70]
                ]
            }),
        ),
        "Lightning" => built_in(
            name,
            "ojqpUUxdGHoIugGPknrUcRoyJiItsjuE",
            100,
            &[7, 20, 23, 32, 34, 35, 49, 65, 66, 74, 80],
            json!({
                "type": "random",
                "hue_range": [240, 240],
                "saturation_range": [10, 11],
                "brightness_range": [90, 100],
                "duration": 0,
                "transition": 50,
                "init_states": [[240, 30, 100]],
                "fadeoff": 150,
                "random_seed": 600,
                "backgrounds": [[200, 100, 100], [200, 50, 10], [210, 10, 50], [240, 10, 0]]
            }),
        ),
        "Ocean" => built_in(
            name,
            "oJjUMosgEMrdumfPANKbkFmBcAdEQsPy",
            30,
            &[0],
            json!({
                "type": "sequence",
                "duration": 0,
                "transition": 2000,
                "direction": 3,
                "spread": 16,
                "repeat_times": 0,
                "sequence": [[198, 84, 30], [198, 70, 30], [198, 10, 30]]
            }),
        ),
        "Rainbow" => built_in(
            name,
            "izRhLCQNcDzIKdpMPqSTtBMuAIoreAuT",
            100,
            &[0],
            json!({
                "type": "sequence",
                "duration": 0,
                "transition": 1500,
                "direction": 1,
                "spread": 12,
                "repeat_times": 0,
                "sequence": [[0, 100, 100], [100, 100, 100], [200, 100, 100], [300, 100, 100]]
            }),
        ),
        "Raindrop" => built_in(
            name,
            "QbDFwiSFmLzQenUOPnJrsGqyIVrJrRsl",
            30,
            &[0],
            json!({
                "type": "random",
                "hue_range": [200, 200],
                "saturation_range": [10, 20],
                "brightness_range": [10, 30],
                "duration": 0,
                "transition": 1000,
                "init_states": [[200, 40, 100]],
                "fadeoff": 1000,
                "random_seed": 24,
                "backgrounds": [[200, 40, 0]]
            }),
        ),
        "Spring" => built_in(
            name,
            "URdUpEdQbnOOechDBPMkKrwhSupLyvAg",
            100,
            &[0],
            json!({
                "type": "random",
                "hue_range": [0, 90],
                "saturation_range": [30, 100],
                "brightness_range": [90, 100],
                "duration": 600,
                "transition": 0,
                "transition_range": [2000, 6000],
                "init_states": [[80, 30, 100]],
                "fadeoff": 1000,
                "random_seed": 20,
                "backgrounds": [[130, 100, 40]]
            }),
        ),
        "Sunrise" => {
            let mut effect = built_in(
                name,
                "TZaNicsWpzuXhNhmQgeTzZiEGynAsfav",
                100,
                &[0],
                json!({
                    "type": "pulse",
                    "duration": 600,
                    "transition": 60000,
                    "direction": 1,
                    "spread": 1,
                    "repeat_times": 1,
                    "run_time": 0,
                    "sequence": SUNRISE_STEPS,
                    "trans_sequence": []
                }),
            );
            effect["expansion_strategy"] = json!(2);
            effect
        }
        "Sunset" => {
            let mut steps = SUNRISE_STEPS;
            steps.reverse();
            let mut effect = built_in(
                name,
                "xOhCQdmpjYrmpeEJCYKwMCzDFBcbhYIv",
                100,
                &[0],
                json!({
                    "type": "pulse",
                    "duration": 600,
                    "transition": 60000,
                    "direction": 1,
                    "spread": 1,
                    "repeat_times": 1,
                    "run_time": 0,
                    "sequence": steps,
                    "trans_sequence": []
                }),
            );
            effect["expansion_strategy"] = json!(2);
            effect
        }
        "Valentines" => built_in(
            name,
            "QglBhMShPHUAuxLqzNEqmlJRkzVlwDVH",
            100,
            &[0],
            json!({
                "type": "random",
                "hue_range": [340, 340],
                "saturation_range": [30, 40],
                "brightness_range": [90, 100],
                "duration": 600,
                "transition": 2000,
                "init_states": [[340, 30, 100]],
                "fadeoff": 3000,
                "random_seed": 100,
                "backgrounds": [[340, 20, 50], [20, 50, 50], [0, 100, 50]]
            }),
        ),
        _ => return None,
    };
    Some(effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_has_a_payload() {
        for name in EFFECT_NAMES {
            let effect = effect(name).unwrap_or_else(|| panic!("no payload for {name}"));
            assert_eq!(effect["name"], name);
            assert_eq!(effect["enable"], 1);
            assert_eq!(effect["custom"], 0);
            assert!(effect["type"].is_string());
        }
        assert!(effect("Disco").is_none());
    }

    #[test]
    fn effect_ids_are_distinct() {
        let mut ids: Vec<String> = EFFECT_NAMES
            .iter()
            .filter_map(|name| effect(name))
            .map(|effect| effect["id"].as_str().unwrap_or_default().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), EFFECT_NAMES.len());
    }

    #[test]
    fn sunset_runs_sunrise_backwards() {
        let sunrise = effect("Sunrise").unwrap();
        let sunset = effect("Sunset").unwrap();
        assert_eq!(sunrise["sequence"][0], json!([0, 100, 5]));
        assert_eq!(sunset["sequence"][0], json!([30, 0, 100]));
        assert_eq!(sunset["expansion_strategy"], 2);
    }
}
