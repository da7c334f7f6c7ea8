use poise::serenity_prelude as serenity;

use crate::{Context, Error};

/// Start a quiz round.
#[poise::command(slash_command, prefix_command)]
pub async fn startquiz(ctx: Context<'_>) -> Result<(), Error> {
    let manager = songbird::get(ctx.serenity_context())
        .await
        .ok_or("voice client was not initialised")?;

    if ctx
        .data()
        .game
        .start(ctx.serenity_context().http.clone(), manager)
        .await
    {
        ctx.say("🎶 Starting a new quiz round!").await?;
    } else {
        ctx.say("A round is already running.").await?;
    }
    Ok(())
}

/// Show the leaderboard.
#[poise::command(slash_command, prefix_command)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "How many players to show"] top: Option<u32>,
) -> Result<(), Error> {
    let output = match ctx
        .data()
        .game
        .leaderboard_view(top.map(|n| n as usize))
    {
        Some(rows) => format!("## 🏆 Leaderboard 🏆\n{rows}"),
        None => "Nobody has scored yet.".to_string(),
    };

    ctx.send(
        poise::CreateReply::default()
            .content(output)
            .allowed_mentions(serenity::CreateAllowedMentions::new().empty_users()),
    )
    .await?;
    Ok(())
}

/// End the current quiz round immediately.
#[poise::command(slash_command, prefix_command)]
pub async fn endquiz(ctx: Context<'_>) -> Result<(), Error> {
    if ctx.data().game.stop() {
        ctx.say("🛑 Quiz ended manually.").await?;
    } else {
        ctx.say("No quiz is running.").await?;
    }
    Ok(())
}
