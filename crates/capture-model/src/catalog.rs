//! Fixed catalog of workout packages attached to an analysis upload.

use serde::Serialize;

/// One weekly training plan. The catalog is closed; entries never change
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkoutPackage {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub monday: &'static str,
    pub tuesday: &'static str,
    pub wednesday: &'static str,
    pub thursday: &'static str,
    pub friday: &'static str,
    pub saturday: &'static str,
    pub sunday: &'static str,
}

impl WorkoutPackage {
    /// Day name and plan text, Monday first.
    pub fn days(&self) -> [(&'static str, &'static str); 7] {
        [
            ("Monday", self.monday),
            ("Tuesday", self.tuesday),
            ("Wednesday", self.wednesday),
            ("Thursday", self.thursday),
            ("Friday", self.friday),
            ("Saturday", self.saturday),
            ("Sunday", self.sunday),
        ]
    }
}

pub const WORKOUT_PACKAGES: [WorkoutPackage; 8] = [
    WorkoutPackage {
        id: "power-hitter",
        title: "Power Hitter Development",
        description: "Focus on generating bat speed and power",
        monday: "Tee work: 50 swings focusing on hip rotation",
        tuesday: "Weighted bat drills: 3 sets of 20 swings",
        wednesday: "Rest day - video review",
        thursday: "Soft toss: 100 swings with power focus",
        friday: "Live BP: 50 pitches",
        saturday: "Game simulation: 30 at-bats",
        sunday: "Recovery: light tee work",
    },
    WorkoutPackage {
        id: "contact-specialist",
        title: "Contact & Consistency",
        description: "Improve bat control and contact rate",
        monday: "Two-strike drills: 30 reps",
        tuesday: "Opposite field hitting: 50 swings",
        wednesday: "Bunting practice: 20 reps",
        thursday: "Soft toss variety: 75 swings",
        friday: "Live BP: focus on contact",
        saturday: "Situational hitting drills",
        sunday: "Light tee work: 30 swings",
    },
    WorkoutPackage {
        id: "timing-rhythm",
        title: "Timing & Rhythm",
        description: "Develop consistent timing and rhythm",
        monday: "Front toss timing drills: 60 swings",
        tuesday: "Variable speed BP: 40 pitches",
        wednesday: "Video analysis day",
        thursday: "Rhythm tee work: 50 swings",
        friday: "Live BP with timing focus",
        saturday: "Mixed speed practice",
        sunday: "Recovery: visualization",
    },
    WorkoutPackage {
        id: "youth-fundamentals",
        title: "Youth Fundamentals",
        description: "Build proper mechanics for young players",
        monday: "Stance and grip work: 20 mins",
        tuesday: "Tee work basics: 40 swings",
        wednesday: "Balance drills: 15 mins",
        thursday: "Soft toss: 30 swings",
        friday: "Coach pitch: 25 swings",
        saturday: "Fun hitting games",
        sunday: "Rest day",
    },
    WorkoutPackage {
        id: "advanced-mechanics",
        title: "Advanced Mechanics",
        description: "Fine-tune swing mechanics",
        monday: "Load and stride drills: 30 reps",
        tuesday: "Bat path work: 50 swings",
        wednesday: "Film review and adjustments",
        thursday: "Connection drills: 40 swings",
        friday: "Live BP with mechanics focus",
        saturday: "Full swing integration",
        sunday: "Light mechanical work",
    },
    WorkoutPackage {
        id: "speed-agility",
        title: "Bat Speed & Agility",
        description: "Increase bat speed and quick hands",
        monday: "Underload bat training: 50 swings",
        tuesday: "Quick hands drills: 30 reps",
        wednesday: "Resistance band work",
        thursday: "Overload/underload combo",
        friday: "Velocity training BP",
        saturday: "Speed measurement day",
        sunday: "Recovery stretching",
    },
    WorkoutPackage {
        id: "game-ready",
        title: "Game Ready Prep",
        description: "Prepare for game situations",
        monday: "Situational hitting: 40 ABs",
        tuesday: "Count leverage drills",
        wednesday: "Mental preparation",
        thursday: "Live BP game scenarios",
        friday: "Pressure situations practice",
        saturday: "Simulated game",
        sunday: "Recovery and review",
    },
    WorkoutPackage {
        id: "corrective-program",
        title: "Corrective Program",
        description: "Fix specific swing flaws",
        monday: "Isolation drills for flaw: 40 reps",
        tuesday: "Progressive correction work",
        wednesday: "Video comparison day",
        thursday: "Integration drills: 50 swings",
        friday: "Live BP with corrections",
        saturday: "Full swing assessment",
        sunday: "Light maintenance work",
    },
];

pub fn find_package(id: &str) -> Option<&'static WorkoutPackage> {
    WORKOUT_PACKAGES.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_ids_unique() {
        let ids: HashSet<_> = WORKOUT_PACKAGES.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_find_package() {
        let pkg = find_package("game-ready").unwrap();
        assert_eq!(pkg.title, "Game Ready Prep");
        assert_eq!(pkg.days()[6], ("Sunday", "Recovery and review"));
        assert!(find_package("bullpen").is_none());
    }
}
