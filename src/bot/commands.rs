use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registers commands globally.
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registers commands for a single guild (development).
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        clear_command(),
        queue_command(),
        nowplaying_command(),
        pause_command(),
        resume_command(),
        disconnect_command(),
    ]
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Plays a track or playlist, or searches for one")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skips the current track")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pauses playback")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resumes paused playback")
}

// Queue

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Removes every queued track")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Shows the upcoming tracks")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Shows the current track")
}

// Voice

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect").description("Stops playback and leaves the voice channel")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_names_are_unique() {
        let names: Vec<String> = all_commands()
            .iter()
            .map(|command| {
                serde_json::to_value(command).unwrap()["name"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            })
            .collect();

        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        assert!(names.contains(&"play".to_string()));
    }
}
