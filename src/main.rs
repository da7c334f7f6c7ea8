use std::sync::Arc;

use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use songbird::SerenityInit;
use tracing_subscriber::EnvFilter;

use music_quiz_bot::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::load()?;
    let token = config.discord_token.clone();

    let questions = questions::load(&config.questions_file);
    let leaderboard = Leaderboard::load(&config.leaderboard_file);
    let game = Arc::new(Game::new(config, questions, leaderboard));

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let setup_game = game.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::startquiz(),
                commands::leaderboard(),
                commands::endquiz(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(handler::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            let game = setup_game.clone();
            Box::pin(async move {
                let guild_id = serenity::GuildId::new(game.config.guild_id);
                poise::builtins::register_in_guild(ctx, &framework.options().commands, guild_id)
                    .await?;
                tracing::info!("Bot started.");
                Ok(Data { game })
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .register_songbird()
        .await;
    client?.start().await?;

    Ok(())
}
