//! List workout packages.

use swingcast_capture_model::catalog::WORKOUT_PACKAGES;

pub fn run(json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&WORKOUT_PACKAGES)?);
        return Ok(());
    }
    for package in &WORKOUT_PACKAGES {
        println!("{}  {}", package.id, package.title);
        println!("    {}", package.description);
        for (day, plan) in package.days() {
            println!("    {day:<10} {plan}");
        }
        println!();
    }
    Ok(())
}
