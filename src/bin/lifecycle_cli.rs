use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use delivery_lifecycle::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{order_item_status, order_status, receipt, user, OrderItemStatus, OrderStatus, UserType},
    services::{
        orders::{CreateOrderRequest, NewOrderItem, OrderDetails, UpdateOrderRequest},
        receipts::CreateReceiptRequest,
        LifecycleServices,
    },
    ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::User(command) => handle_user_command(&context, command, cli.json).await?,
        Commands::Order(command) => handle_order_command(&context, command, cli.json).await?,
        Commands::Item(command) => handle_item_command(&context, command, cli.json).await?,
        Commands::Receipt(command) => handle_receipt_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "lifecycle", about = "Delivery order lifecycle tooling", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    User(UserCommands),
    #[command(subcommand)]
    Order(OrderCommands),
    #[command(subcommand)]
    Item(ItemCommands),
    #[command(subcommand)]
    Receipt(ReceiptCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user record
    Add(UserAddArgs),
}

#[derive(Args)]
struct UserAddArgs {
    #[arg(long)]
    email: String,
    #[arg(long, help = "CLIENT, COURIER or ADMIN")]
    user_type: UserType,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
}

#[derive(Subcommand)]
enum OrderCommands {
    Create(OrderCreateArgs),
    Show(OrderIdArgs),
    Status(OrderStatusArgs),
    Update(OrderUpdateArgs),
    History(OrderIdArgs),
    Delete(OrderIdArgs),
}

#[derive(Args)]
struct OrderCreateArgs {
    #[arg(long)]
    client: Uuid,
    #[arg(long)]
    pickup: String,
    #[arg(
        long = "item",
        required = true,
        help = "Drop-off as ADDRESS|PHONE[|NOTES]; repeat for more items"
    )]
    items: Vec<String>,
}

#[derive(Args)]
struct OrderIdArgs {
    #[arg(long)]
    id: Uuid,
}

#[derive(Args)]
struct OrderUpdateArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, help = "New pickup address")]
    pickup: Option<String>,
}

#[derive(Args)]
struct OrderStatusArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, help = "Order status, e.g. PICKED_UP")]
    status: OrderStatus,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Subcommand)]
enum ItemCommands {
    Status(ItemStatusArgs),
    Assign(ItemAssignArgs),
    Unassign(ItemIdArgs),
    History(ItemIdArgs),
}

#[derive(Args)]
struct ItemStatusArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, help = "Item status, e.g. PAID")]
    status: OrderItemStatus,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    actor: Option<Uuid>,
}

#[derive(Args)]
struct ItemAssignArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    courier: Uuid,
}

#[derive(Args)]
struct ItemIdArgs {
    #[arg(long)]
    id: Uuid,
}

#[derive(Subcommand)]
enum ReceiptCommands {
    Create(ReceiptCreateArgs),
    Show(ReceiptShowArgs),
    Pay(ReceiptAmountArgs),
    Refund(ReceiptAmountArgs),
    Cancel(ReceiptIdArgs),
}

#[derive(Args)]
struct ReceiptCreateArgs {
    #[arg(long)]
    order: Uuid,
    #[arg(long)]
    delivery_fee: Option<Decimal>,
    #[arg(long)]
    booking_fee: Option<Decimal>,
    #[arg(long)]
    discount: Option<Decimal>,
    #[arg(long, help = "Defaults to delivery fee + booking fee - discount")]
    total: Option<Decimal>,
}

#[derive(Args)]
struct ReceiptShowArgs {
    #[arg(long, conflicts_with = "order", required_unless_present = "order")]
    id: Option<Uuid>,
    #[arg(long)]
    order: Option<Uuid>,
}

#[derive(Args)]
struct ReceiptAmountArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long)]
    amount: Decimal,
}

#[derive(Args)]
struct ReceiptIdArgs {
    #[arg(long)]
    id: Uuid,
}

struct CliContext {
    db: Arc<DbPool>,
    services: LifecycleServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);
        debug!(environment = %config.environment, "CLI context ready");

        let services = LifecycleServices::with_db_users(db.clone(), config.lifecycle.clone());
        Ok(Self { db, services })
    }
}

async fn handle_user_command(context: &CliContext, command: UserCommands, json: bool) -> Result<()> {
    match command {
        UserCommands::Add(args) => {
            let created = user::ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(args.email),
                name: Set(args.name),
                phone: Set(args.phone),
                user_type: Set(args.user_type),
                created_at: Set(Utc::now()),
            }
            .insert(&*context.db)
            .await
            .context("failed to create user")?;

            if json {
                print_json(&created)?;
            } else {
                println!("User {} ({}) created as {}", created.id, created.email, created.user_type);
            }
        }
    }
    Ok(())
}

async fn handle_order_command(
    context: &CliContext,
    command: OrderCommands,
    json: bool,
) -> Result<()> {
    let orders = &context.services.orders;

    match command {
        OrderCommands::Create(args) => {
            let items = args
                .items
                .iter()
                .map(|raw| parse_item(raw))
                .collect::<Result<Vec<_>>>()?;
            let details = orders
                .create_order(CreateOrderRequest {
                    client_id: args.client,
                    pickup_address: args.pickup,
                    items,
                })
                .await
                .map_err(cli_error)?;
            render_details(&details, json)?;
        }
        OrderCommands::Show(args) => {
            let details = orders.get_order(args.id).await.map_err(cli_error)?;
            render_details(&details, json)?;
        }
        OrderCommands::Status(args) => {
            let result = orders
                .set_order_status(args.id, args.status, args.description)
                .await;
            match result {
                Ok(row) => render_order_status(&row, json)?,
                Err(ServiceError::PartialCascade {
                    order_id,
                    succeeded,
                    failed,
                }) => {
                    if json {
                        print_json(&serde_json::json!({
                            "order_id": order_id,
                            "succeeded": succeeded,
                            "failed": failed,
                        }))?;
                    } else {
                        println!(
                            "Order {} updated; {} item(s) moved, {} failed:",
                            order_id,
                            succeeded.len(),
                            failed.len()
                        );
                        for failure in &failed {
                            println!("  - {}: {}", failure.order_item_id, failure.reason);
                        }
                    }
                    return Err(anyhow!("pick-up cascade partially applied"));
                }
                Err(e) => return Err(cli_error(e)),
            }
        }
        OrderCommands::Update(args) => {
            let details = orders
                .update_order(
                    args.id,
                    UpdateOrderRequest {
                        pickup_address: args.pickup,
                    },
                )
                .await
                .map_err(cli_error)?;
            render_details(&details, json)?;
        }
        OrderCommands::History(args) => {
            let history = context
                .services
                .ledger
                .order_history(args.id)
                .await
                .map_err(cli_error)?;
            if json {
                print_json(&history)?;
            } else {
                for row in &history {
                    render_order_status(row, false)?;
                }
            }
        }
        OrderCommands::Delete(args) => {
            orders.delete_order(args.id).await.map_err(cli_error)?;
            if json {
                print_json(&serde_json::json!({ "deleted": args.id }))?;
            } else {
                println!("Order {} deleted", args.id);
            }
        }
    }

    Ok(())
}

async fn handle_item_command(context: &CliContext, command: ItemCommands, json: bool) -> Result<()> {
    let orders = &context.services.orders;

    match command {
        ItemCommands::Status(args) => {
            let row = orders
                .set_order_item_status(args.id, args.status, args.notes, args.actor)
                .await
                .map_err(cli_error)?;
            render_item_status(&row, json)?;
        }
        ItemCommands::Assign(args) => {
            let item = orders
                .assign_courier(args.id, args.courier)
                .await
                .map_err(cli_error)?;
            if json {
                print_json(&item)?;
            } else {
                println!("Item {} assigned to courier {} ({})", item.id, args.courier, item.status);
            }
        }
        ItemCommands::Unassign(args) => {
            let item = orders.unassign_courier(args.id).await.map_err(cli_error)?;
            if json {
                print_json(&item)?;
            } else {
                println!("Item {} unassigned ({})", item.id, item.status);
            }
        }
        ItemCommands::History(args) => {
            let history = context
                .services
                .ledger
                .item_history(args.id)
                .await
                .map_err(cli_error)?;
            if json {
                print_json(&history)?;
            } else {
                for row in &history {
                    render_item_status(row, false)?;
                }
            }
        }
    }

    Ok(())
}

async fn handle_receipt_command(
    context: &CliContext,
    command: ReceiptCommands,
    json: bool,
) -> Result<()> {
    let receipts = &context.services.receipts;

    let receipt = match command {
        ReceiptCommands::Create(args) => receipts
            .create_receipt(CreateReceiptRequest {
                order_id: args.order,
                delivery_fee: args.delivery_fee,
                booking_fee: args.booking_fee,
                discount: args.discount,
                total: args.total,
                ..Default::default()
            })
            .await
            .map_err(cli_error)?,
        ReceiptCommands::Show(args) => match (args.id, args.order) {
            (Some(id), _) => receipts.get_receipt(id).await.map_err(cli_error)?,
            (None, Some(order_id)) => receipts
                .get_receipt_by_order(order_id)
                .await
                .map_err(cli_error)?,
            (None, None) => return Err(anyhow!("either --id or --order is required")),
        },
        ReceiptCommands::Pay(args) => receipts.pay(args.id, args.amount).await.map_err(cli_error)?,
        ReceiptCommands::Refund(args) => receipts
            .refund(args.id, args.amount)
            .await
            .map_err(cli_error)?,
        ReceiptCommands::Cancel(args) => receipts.cancel(args.id).await.map_err(cli_error)?,
    };

    render_receipt(&receipt, json)
}

fn parse_item(raw: &str) -> Result<NewOrderItem> {
    let mut parts = raw.splitn(3, '|');
    let delivery_address = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("item '{}' is missing an address", raw))?;
    let delivery_phone = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("item '{}' is missing a phone number", raw))?;
    let delivery_notes = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(NewOrderItem {
        delivery_address: delivery_address.to_string(),
        delivery_phone: delivery_phone.to_string(),
        delivery_notes,
    })
}

fn cli_error(error: ServiceError) -> anyhow::Error {
    anyhow!("{} ({})", error, error.status_code())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_details(details: &OrderDetails, json: bool) -> Result<()> {
    if json {
        return print_json(details);
    }

    let status = details
        .current_status
        .as_ref()
        .map(|row| row.status.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "Order {} • client {} • pickup {} • status {}",
        details.order.id, details.order.client_id, details.order.pickup_address, status
    );
    for entry in &details.items {
        println!(
            "  • item {} → {} ({}) • courier {}",
            entry.item.id,
            entry.item.delivery_address,
            entry.item.status,
            entry
                .item
                .courier_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    if let Some(receipt) = &details.receipt {
        println!(
            "  receipt {} • paid {} of {} • {}",
            receipt.id, receipt.amount_paid, receipt.total, receipt.receipt_status
        );
    }
    Ok(())
}

fn render_order_status(row: &order_status::Model, json: bool) -> Result<()> {
    if json {
        return print_json(row);
    }
    println!(
        "#{} {} {}{} {}",
        row.sequence,
        row.created_at.to_rfc3339(),
        row.status,
        if row.is_current { " (current)" } else { "" },
        row.description.as_deref().unwrap_or("")
    );
    Ok(())
}

fn render_item_status(row: &order_item_status::Model, json: bool) -> Result<()> {
    if json {
        return print_json(row);
    }
    println!(
        "#{} {} {}{} {}",
        row.sequence,
        row.created_at.to_rfc3339(),
        row.status,
        if row.is_current { " (current)" } else { "" },
        row.notes.as_deref().unwrap_or("")
    );
    Ok(())
}

fn render_receipt(receipt: &receipt::Model, json: bool) -> Result<()> {
    if json {
        return print_json(receipt);
    }
    println!(
        "Receipt {} • order {} • paid {} of {} • {}",
        receipt.id, receipt.order_id, receipt.amount_paid, receipt.total, receipt.receipt_status
    );
    Ok(())
}
